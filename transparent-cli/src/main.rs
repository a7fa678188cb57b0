mod commands;
mod config;

use clap::{Parser, Subcommand};
use config::CliConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transparent_core::{CoreError, EngineConfig, HttpQuestionGenerator, LocalLedger, WalletAddress};
use transparent_game::{GameEngine, GameError};

#[derive(Parser)]
#[command(name = "transparent")]
#[command(about = "Transparent - the honesty party game, from the terminal")]
#[command(version)]
struct Cli {
    /// Data directory for the game database
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Wallet to act as
    #[arg(short, long, global = true)]
    wallet: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lobby commands: create, join, ready, start
    #[command(subcommand)]
    Game(commands::GameCommands),

    /// In-round actions: questions, votes, raises, predictions
    #[command(subcommand)]
    Play(commands::PlayCommands),

    /// Winner and payout commands
    #[command(subcommand)]
    Payout(commands::PayoutCommands),

    /// Local ledger commands
    #[command(subcommand)]
    Funds(commands::FundsCommands),

    /// Follow a game live
    Watch(commands::WatchArgs),

    /// Show or change CLI and engine settings
    #[command(subcommand)]
    Config(commands::ConfigCommands),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "transparent={0},transparent_core={0},transparent_game={0}",
            log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Get data directory
    let data_dir = cli.data_dir.unwrap_or_else(config::default_data_dir);
    tokio::fs::create_dir_all(&data_dir).await?;

    let cli_config = CliConfig::load(&data_dir).await?;
    let engine_config = EngineConfig::load(&data_dir).await?;

    let storage = Arc::new(transparent_core::open_storage(&data_dir, &engine_config).await?);
    let ledger = Arc::new(LocalLedger::new(storage.clone()));

    let mut engine = GameEngine::new(storage.clone(), ledger.clone(), engine_config.clone())?;
    if let Some(generator) = &engine_config.question_generator {
        engine = engine.with_generator(Arc::new(HttpQuestionGenerator::new(generator.clone())?));
    }

    let wallet = match cli.wallet.or_else(|| cli_config.default_wallet.clone()) {
        Some(raw) => Some(WalletAddress::parse(&raw)?),
        None => None,
    };

    let ctx = commands::Context {
        engine: Arc::new(engine),
        ledger,
        storage,
        engine_config,
        cli_config,
        wallet,
    };

    // Execute command
    let result = match cli.command {
        Commands::Game(cmd) => commands::handle_game_command(cmd, &ctx).await,
        Commands::Play(cmd) => commands::handle_play_command(cmd, &ctx).await,
        Commands::Payout(cmd) => commands::handle_payout_command(cmd, &ctx).await,
        Commands::Funds(cmd) => commands::handle_funds_command(cmd, &ctx).await,
        Commands::Watch(args) => commands::handle_watch_command(args, &ctx).await,
        Commands::Config(cmd) => commands::handle_config_command(cmd, &ctx).await,
    };

    if let Err(e) = result {
        match e {
            GameError::Core(CoreError::InsufficientFunds { need, available }) => {
                eprintln!("Error: Insufficient funds");
                eprintln!("Need: {} lamports, Available: {} lamports", need, available);
                eprintln!("Use 'transparent funds airdrop' to top up a local wallet");
            }
            GameError::RoomNotFound(code) => {
                eprintln!("Error: No game with room code {}", code);
                eprintln!("Use 'transparent game list' to see games");
            }
            GameError::PlayersNotReady(names) => {
                eprintln!("Error: Waiting on {} to ready up", names.join(", "));
            }
            GameError::Core(CoreError::Transfer(_) | CoreError::TransferTimeout(_)) => {
                eprintln!("Error: {}", e);
                eprintln!("Retry with 'transparent payout distribute' or settle with 'transparent payout override'");
            }
            _ => {
                eprintln!("Error: {}", e);
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
