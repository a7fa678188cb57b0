use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use transparent_core::{CoreError, Result};

const CLI_CONFIG_FILE: &str = "cli.json";

/// Per-machine CLI settings, kept next to the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub data_dir: PathBuf,
    /// Wallet used when `--wallet` is not given.
    pub default_wallet: Option<String>,
    /// Display name used when joining without `--name`.
    pub default_name: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_wallet: None,
            default_name: None,
        }
    }
}

impl CliConfig {
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CLI_CONFIG_FILE);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Self {
                data_dir: data_dir.to_path_buf(),
                ..Self::default()
            });
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let mut config: CliConfig = serde_json::from_str(&content)?;
        config.data_dir = data_dir.to_path_buf();
        Ok(config)
    }

    pub async fn save(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(self.data_dir.join(CLI_CONFIG_FILE), content)
            .await
            .map_err(CoreError::from)
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("transparent")
}
