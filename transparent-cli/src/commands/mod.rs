pub mod config;
pub mod funds;
pub mod game;
pub mod live;
pub mod payout;
pub mod play;

pub use config::{handle_config_command, ConfigCommands};
pub use funds::{handle_funds_command, FundsCommands};
pub use game::{handle_game_command, GameCommands};
pub use live::{handle_watch_command, WatchArgs};
pub use payout::{handle_payout_command, PayoutCommands};
pub use play::{handle_play_command, PlayCommands};

use crate::config::CliConfig;
use comfy_table::{presets::UTF8_FULL, Table};
use std::sync::Arc;
use transparent_core::types::{GameRecord, PayoutRecord};
use transparent_core::{EngineConfig, Lamports, LocalLedger, Storage, WalletAddress};
use transparent_game::{GameEngine, GameError, GameView, Result};

/// Everything a command handler needs.
pub struct Context {
    pub engine: Arc<GameEngine>,
    pub ledger: Arc<LocalLedger>,
    pub storage: Arc<Storage>,
    pub engine_config: EngineConfig,
    pub cli_config: CliConfig,
    pub wallet: Option<WalletAddress>,
}

impl Context {
    /// The wallet this invocation acts as.
    pub fn me(&self) -> Result<&WalletAddress> {
        self.wallet.as_ref().ok_or_else(|| {
            GameError::InvalidConfig(
                "no wallet selected, pass --wallet or run 'transparent config use <wallet>'"
                    .to_string(),
            )
        })
    }

    pub async fn room(&self, room_code: &str) -> Result<GameRecord> {
        self.engine.find_game(room_code).await
    }
}

pub fn parse_sol(raw: &str) -> Result<Lamports> {
    let sol: f64 = raw
        .trim()
        .parse()
        .map_err(|_| GameError::InvalidAmount(format!("'{}' is not a SOL amount", raw)))?;
    Ok(Lamports::from_sol(sol)?)
}

pub fn parse_wallet(raw: &str) -> Result<WalletAddress> {
    Ok(WalletAddress::parse(raw)?)
}

pub fn print_view(view: &GameView) {
    let game = &view.snapshot.game;

    println!("{} [{}]", game.room_name, game.display_code());
    println!("  Status: {}", game.status);
    if let Some(phase) = game.game_phase {
        println!("  Round: {}/{} ({})", game.current_round, view.total_rounds, phase);
    }
    if let Some(name) = view.hot_seat_name() {
        println!("  Hot seat: {}", name);
    }
    if let Some(question) = &game.current_question {
        println!("  Question: {}", question);
    }
    for (i, option) in game.question_options.iter().enumerate() {
        let votes = view.pick_counts.get(i).copied().unwrap_or(0);
        let marker = if view.pick_leader == Some(i) { "*" } else { " " };
        println!("   {}[{}] {} ({} votes)", marker, i, option, votes);
    }
    if view.quorum.is_some() {
        println!("  Progress: {}/{}", view.progress, view.voter_count);
    }
    if let Some(seconds) = view.seconds_left {
        println!("  Time left: {}s", seconds);
    }
    println!("  Pot: {}", game.current_pot);
    if !view.prediction_pot.is_zero() {
        println!("  Prediction pot: {}", view.prediction_pot);
    }
    if let Some(winner) = view.winner() {
        println!("  Winner: {}", view.name_of(winner));
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Player", "Wallet", "Ready", "Transparent", "Fake", "Honesty"]);
    for player in view.snapshot.players.iter().filter(|p| !p.is_host) {
        let score = view.scores.iter().find(|s| s.wallet == player.wallet);
        let (transparent, fake, ratio) = score.map_or((0, 0, 0.0), |s| {
            (s.tally.transparent, s.tally.fake, s.honesty_ratio())
        });
        table.add_row(vec![
            player.name.clone(),
            player.wallet.to_string(),
            if player.is_ready { "yes" } else { "no" }.to_string(),
            transparent.to_string(),
            fake.to_string(),
            format!("{:.0}%", ratio * 100.0),
        ]);
    }
    println!("{}", table);
}

pub fn payouts_table(payouts: &[PayoutRecord]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Wallet", "Kind", "Amount", "Signature"]);
    for payout in payouts {
        table.add_row(vec![
            payout.wallet.to_string(),
            payout.kind.to_string(),
            payout.amount.to_string(),
            payout.signature.clone().unwrap_or_else(|| "pending".to_string()),
        ]);
    }
    table
}
