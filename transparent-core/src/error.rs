use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Game not found: {0}")]
    GameNotFound(String),

    #[error("Player {wallet} not found in game {game_id}")]
    PlayerNotFound { game_id: String, wallet: String },

    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds: need {need} lamports, have {available} lamports")]
    InsufficientFunds { need: u64, available: u64 },

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Transfer confirmation timed out: {0}")]
    TransferTimeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Question generator error: {0}")]
    Generator(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn generator(msg: impl Into<String>) -> Self {
        Self::Generator(msg.into())
    }

    /// Errors raised by the funds-movement service.
    pub fn is_funds(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds { .. } | Self::Transfer(_) | Self::TransferTimeout(_)
        )
    }

    /// Errors that the sync layer swallows and retries on the next poll.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Generator(_))
            || matches!(
                self,
                Self::Storage(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::DatabaseBusy
                        || e.code == rusqlite::ErrorCode::DatabaseLocked
            )
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::Network(err.to_string())
    }
}
