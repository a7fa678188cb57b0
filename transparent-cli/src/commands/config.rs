use super::{parse_wallet, Context};
use clap::Subcommand;
use transparent_core::config::CONFIG_FILE;
use transparent_game::{GameError, Result};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the active settings
    Show,
    /// Act as this wallet by default
    Use {
        wallet: String,
        /// Default display name
        #[arg(long)]
        name: Option<String>,
    },
    /// Write the engine settings file with current values
    Init,
}

pub async fn handle_config_command(cmd: ConfigCommands, ctx: &Context) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            println!("Data directory: {}", ctx.cli_config.data_dir.display());
            println!(
                "Wallet: {}",
                ctx.wallet.as_ref().map_or("(none)".to_string(), |w| w.to_string())
            );
            let raw = serde_json::to_string_pretty(&ctx.engine_config)
                .map_err(|e| GameError::internal(e.to_string()))?;
            println!("Engine settings:");
            println!("{}", raw);
        }

        ConfigCommands::Use { wallet, name } => {
            let wallet = parse_wallet(&wallet)?;
            let mut config = ctx.cli_config.clone();
            config.default_wallet = Some(wallet.to_string());
            if name.is_some() {
                config.default_name = name;
            }
            config.save().await?;
            println!("Now acting as {}", wallet);
        }

        ConfigCommands::Init => {
            ctx.engine_config.save(&ctx.cli_config.data_dir).await?;
            println!(
                "Wrote {}",
                ctx.cli_config.data_dir.join(CONFIG_FILE).display()
            );
        }
    }

    Ok(())
}
