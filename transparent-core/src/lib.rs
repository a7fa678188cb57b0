//! Transparent core - shared game store, sync and funds layer
//!
//! Holds the persistent record of every game, publishes row-level change
//! events, keeps client views in sync with push plus pull, and defines the
//! funds-movement and question-generator collaborators.

pub mod config;
pub mod error;
pub mod funds;
pub mod questions;
pub mod storage;
pub mod sync;
pub mod types;

pub use config::{EngineConfig, GeneratorConfig, PhaseDurations};
pub use error::{CoreError, Result};
pub use funds::{FundsService, LocalLedger, TransferRecord};
pub use questions::{GenerateRequest, HttpQuestionGenerator, QuestionGenerator};
pub use storage::{ChangeEvent, Storage, Table};
pub use sync::{ClientSession, GameSync, LocalStore, PendingIntents, SessionToken};
pub use types::{
    GamePhase, GameRecord, GameSnapshot, GameStatus, Lamports, PayoutKind, PayoutMode,
    QuestionMode, VoteValue, WalletAddress, LAMPORTS_PER_SOL,
};

/// Database file name inside the data directory.
pub const DB_FILE: &str = "transparent.db";

/// Open (or create) the store in a data directory.
pub async fn open_storage(data_dir: &std::path::Path, config: &EngineConfig) -> Result<Storage> {
    Storage::new(&data_dir.join(DB_FILE), config.broadcast_capacity).await
}
