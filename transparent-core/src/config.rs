use crate::error::{CoreError, Result};
use crate::types::GamePhase;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pull interval while the game is waiting for players.
    pub pull_interval_waiting: Duration,
    /// Pull interval during gameplay.
    pub pull_interval_playing: Duration,
    pub phase_durations: PhaseDurations,
    /// Minimum number of non-host players required to start.
    pub min_players: usize,
    pub max_players: usize,
    pub question_option_count: usize,
    pub max_question_len: usize,
    pub transfer_timeout: Duration,
    pub broadcast_capacity: usize,
    pub question_generator: Option<GeneratorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseDurations {
    pub submitting_questions: Duration,
    pub voting_question: Duration,
    pub picking_question: Duration,
    pub answering: Duration,
    pub voting_honesty: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub vibe: Option<String>,
    pub spice_level: Option<String>,
    pub context: Option<String>,
    pub count: usize,
    pub timeout: Duration,
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            submitting_questions: Duration::from_secs(30),
            voting_question: Duration::from_secs(15),
            picking_question: Duration::from_secs(15),
            answering: Duration::from_secs(60),
            voting_honesty: Duration::from_secs(20),
        }
    }
}

impl PhaseDurations {
    pub fn for_phase(&self, phase: GamePhase) -> Duration {
        match phase {
            GamePhase::SubmittingQuestions => self.submitting_questions,
            GamePhase::VotingQuestion => self.voting_question,
            GamePhase::PickingQuestion => self.picking_question,
            GamePhase::Answering => self.answering,
            GamePhase::VotingHonesty => self.voting_honesty,
        }
    }

    /// Same duration for every phase, handy for demos and tests.
    pub fn uniform(duration: Duration) -> Self {
        Self {
            submitting_questions: duration,
            voting_question: duration,
            picking_question: duration,
            answering: duration,
            voting_honesty: duration,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pull_interval_waiting: Duration::from_secs(5),
            pull_interval_playing: Duration::from_secs(3),
            phase_durations: PhaseDurations::default(),
            min_players: 2,
            max_players: 12,
            question_option_count: 4,
            max_question_len: 200,
            transfer_timeout: Duration::from_secs(30),
            broadcast_capacity: 256,
            question_generator: None,
        }
    }
}

impl EngineConfig {
    /// Load `config.json` from the data directory, falling back to defaults.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, data_dir: &Path) -> Result<()> {
        self.validate()?;
        tokio::fs::create_dir_all(data_dir).await?;
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(data_dir.join(CONFIG_FILE), content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pull_interval_waiting.is_zero() || self.pull_interval_playing.is_zero() {
            return Err(CoreError::config("Pull intervals must be greater than 0"));
        }

        if self.min_players == 0 {
            return Err(CoreError::config("At least one player is required"));
        }

        if self.max_players < self.min_players {
            return Err(CoreError::config(
                "max_players cannot be lower than min_players",
            ));
        }

        if self.question_option_count < 2 {
            return Err(CoreError::config("At least two question options are required"));
        }

        if self.max_question_len == 0 {
            return Err(CoreError::config("max_question_len must be greater than 0"));
        }

        if self.broadcast_capacity == 0 {
            return Err(CoreError::config("broadcast_capacity must be greater than 0"));
        }

        if let Some(generator) = &self.question_generator {
            if generator.url.is_empty() {
                return Err(CoreError::config("Question generator URL cannot be empty"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pull_interval_waiting, Duration::from_secs(5));
        assert_eq!(config.pull_interval_playing, Duration::from_secs(3));
    }

    #[test]
    fn test_rejects_bad_player_bounds() {
        let mut config = EngineConfig::default();
        config.min_players = 4;
        config.max_players = 3;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.question_option_count, 4);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.min_players = 3;
        config.save(dir.path()).await.unwrap();

        let loaded = EngineConfig::load(dir.path()).await.unwrap();
        assert_eq!(loaded.min_players, 3);
    }
}
