pub mod game_store;
pub mod payout_store;
pub mod player_store;
pub mod prediction_store;
pub mod vote_store;

pub use game_store::{GameProgress, GameStore, PhaseKey};
pub use payout_store::PayoutStore;
pub use player_store::{JoinOutcome, PlayerStore};
pub use prediction_store::PredictionStore;
pub use vote_store::{InsertOutcome, VoteStore};

use crate::error::{CoreError, Result};
use crate::types::GameSnapshot;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// Table touched by a committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    Games,
    Players,
    Votes,
    QuestionSubmissions,
    Predictions,
    Payouts,
}

/// Row-level change notification published after every committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub game_id: String,
    pub table: Table,
    pub at: DateTime<Utc>,
}

pub struct Storage {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Storage {
    pub async fn new(db_path: &Path, broadcast_capacity: usize) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::internal(format!("Failed to create directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)?;
        // Several CLI processes may share the file
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;

        let (changes, _) = broadcast::channel(broadcast_capacity.max(1));
        let storage = Self {
            conn: Mutex::new(conn),
            changes,
        };

        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        // Games table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS games (
                id TEXT PRIMARY KEY,
                room_code TEXT NOT NULL,
                room_name TEXT NOT NULL,
                host_wallet TEXT NOT NULL,
                buy_in INTEGER NOT NULL,
                payout_mode TEXT NOT NULL,
                question_mode TEXT NOT NULL,
                question_deck TEXT NOT NULL,
                used_questions TEXT NOT NULL,
                status TEXT NOT NULL,
                game_phase TEXT,
                current_round INTEGER NOT NULL,
                num_questions INTEGER NOT NULL,
                hot_seat TEXT,
                current_question TEXT,
                question_options TEXT NOT NULL,
                current_pot INTEGER NOT NULL,
                vote_count INTEGER NOT NULL,
                phase_deadline INTEGER,
                winner TEXT,
                distributed INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        // Room codes are unique among active games only
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS games_active_room_code
             ON games(room_code) WHERE status IN ('waiting', 'playing')",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS players (
                game_id TEXT NOT NULL,
                wallet TEXT NOT NULL,
                name TEXT NOT NULL,
                is_host INTEGER NOT NULL,
                is_ready INTEGER NOT NULL,
                has_paid INTEGER NOT NULL,
                join_seq INTEGER NOT NULL,
                joined_at INTEGER NOT NULL,
                FOREIGN KEY (game_id) REFERENCES games(id),
                PRIMARY KEY (game_id, wallet)
            )",
            [],
        )?;

        // Hot seat history, one row per started round
        conn.execute(
            "CREATE TABLE IF NOT EXISTS rounds (
                game_id TEXT NOT NULL,
                round INTEGER NOT NULL,
                hot_seat TEXT NOT NULL,
                question TEXT,
                FOREIGN KEY (game_id) REFERENCES games(id),
                PRIMARY KEY (game_id, round)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS votes (
                game_id TEXT NOT NULL,
                round INTEGER NOT NULL,
                voter_wallet TEXT NOT NULL,
                vote TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (game_id) REFERENCES games(id),
                PRIMARY KEY (game_id, round, voter_wallet)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS question_submissions (
                id TEXT PRIMARY KEY,
                game_id TEXT NOT NULL,
                round INTEGER NOT NULL,
                submitter_wallet TEXT NOT NULL,
                question_text TEXT NOT NULL,
                votes INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (game_id) REFERENCES games(id),
                UNIQUE (game_id, round, submitter_wallet)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS question_votes (
                game_id TEXT NOT NULL,
                round INTEGER NOT NULL,
                voter_wallet TEXT NOT NULL,
                submission_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (game_id) REFERENCES games(id),
                PRIMARY KEY (game_id, round, voter_wallet)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS pick_votes (
                game_id TEXT NOT NULL,
                round INTEGER NOT NULL,
                voter_wallet TEXT NOT NULL,
                option_index INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (game_id) REFERENCES games(id),
                PRIMARY KEY (game_id, round, voter_wallet)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS predictions (
                id TEXT PRIMARY KEY,
                game_id TEXT NOT NULL,
                bettor_wallet TEXT NOT NULL,
                bettor_name TEXT NOT NULL,
                predicted_winner_wallet TEXT NOT NULL,
                amount INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                settled INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (game_id) REFERENCES games(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS pot_contributions (
                signature TEXT PRIMARY KEY,
                game_id TEXT NOT NULL,
                wallet TEXT NOT NULL,
                amount INTEGER NOT NULL,
                kind TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (game_id) REFERENCES games(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS payouts (
                game_id TEXT NOT NULL,
                wallet TEXT NOT NULL,
                kind TEXT NOT NULL,
                amount INTEGER NOT NULL,
                signature TEXT,
                FOREIGN KEY (game_id) REFERENCES games(id),
                PRIMARY KEY (game_id, wallet, kind)
            )",
            [],
        )?;

        // Local funds ledger
        conn.execute(
            "CREATE TABLE IF NOT EXISTS balances (
                address TEXT PRIMARY KEY,
                lamports INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS transfers (
                signature TEXT PRIMARY KEY,
                from_address TEXT NOT NULL,
                to_address TEXT NOT NULL,
                lamports INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    pub async fn get_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Subscribe to row-level change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    pub(crate) fn notify(&self, game_id: &str, table: Table) {
        let event = ChangeEvent {
            game_id: game_id.to_string(),
            table,
            at: Utc::now(),
        };
        // No subscribers is fine
        let _ = self.changes.send(event);
    }

    /// Read the full state of a game under a single lock.
    pub async fn load_snapshot(&self, game_id: &str) -> Result<GameSnapshot> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let game = game_store::query_game(&tx, game_id)?
            .ok_or_else(|| CoreError::GameNotFound(game_id.to_string()))?;
        let round = game.current_round;

        let snapshot = GameSnapshot {
            players: player_store::query_players(&tx, game_id)?,
            rounds: game_store::query_rounds(&tx, game_id)?,
            votes: vote_store::query_votes(&tx, game_id)?,
            submissions: vote_store::query_submissions(&tx, game_id, round)?,
            question_votes: vote_store::query_question_votes(&tx, game_id, round)?,
            pick_votes: vote_store::query_pick_votes(&tx, game_id, round)?,
            predictions: prediction_store::query_predictions(&tx, game_id)?,
            payouts: payout_store::query_payouts(&tx, game_id)?,
            fetched_at: Utc::now(),
            game,
        };

        tx.commit()?;
        Ok(snapshot)
    }
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

/// Parse a text column, mapping failures onto a rusqlite column error.
pub(crate) fn parse_column<T: FromStr>(row: &Row<'_>, idx: usize, name: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(idx, name.to_string(), rusqlite::types::Type::Text)
    })
}

pub(crate) fn parse_optional_column<T: FromStr>(
    row: &Row<'_>,
    idx: usize,
    name: &str,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse::<T>().map_err(|_| {
            rusqlite::Error::InvalidColumnType(idx, name.to_string(), rusqlite::types::Type::Text)
        })
    })
    .transpose()
}

pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
    name: &str,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|_| {
        rusqlite::Error::InvalidColumnType(idx, name.to_string(), rusqlite::types::Type::Text)
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::types::{GameRecord, GameStatus, Lamports, PayoutMode, QuestionMode, WalletAddress};
    use tempfile::TempDir;

    pub async fn temp_storage() -> (TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(&dir.path().join("test.db"), 64).await.unwrap();
        (dir, storage)
    }

    pub fn wallet(raw: &str) -> WalletAddress {
        WalletAddress::parse(raw).unwrap()
    }

    pub fn sample_game(id: &str, room_code: &str) -> GameRecord {
        let now = Utc::now();
        GameRecord {
            id: id.to_string(),
            room_code: room_code.to_string(),
            room_name: "Friday night".to_string(),
            host_wallet: wallet("host"),
            buy_in: Lamports(100_000_000),
            payout_mode: PayoutMode::SplitPot,
            question_mode: QuestionMode::Classic,
            question_deck: vec!["First question?".to_string(), "Second question?".to_string()],
            used_questions: Vec::new(),
            status: GameStatus::Waiting,
            game_phase: None,
            current_round: 0,
            num_questions: 0,
            hot_seat: None,
            current_question: None,
            question_options: Vec::new(),
            current_pot: Lamports::ZERO,
            vote_count: 0,
            phase_deadline: None,
            winner: None,
            distributed: false,
            created_at: now,
            updated_at: now,
        }
    }
}
