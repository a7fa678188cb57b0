use thiserror::Error;
use transparent_core::types::{GamePhase, GameStatus};
use transparent_core::CoreError;

pub type Result<T> = std::result::Result<T, GameError>;

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any write; show inline and keep going.
    Validation,
    /// Caller is not allowed to do this; nothing was written.
    Authority,
    /// Moving money failed; blocks the initiating user until retried or overridden.
    Funds,
    /// Network or store hiccup; the next sync pull recovers.
    Transient,
    Internal,
}

#[derive(Error, Debug)]
pub enum GameError {
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Game {0} not found")]
    GameNotFound(String),

    #[error("No active game with room code {0}")]
    RoomNotFound(String),

    #[error("Wrong game status: expected {expected}, found {found}")]
    WrongStatus {
        expected: &'static str,
        found: GameStatus,
    },

    #[error("Wrong phase: expected {expected}, found {found}")]
    WrongPhase {
        expected: GamePhase,
        found: String,
    },

    #[error("Player {0} is not in this game")]
    NotInGame(String),

    #[error("Player {0} already joined")]
    AlreadyJoined(String),

    #[error("Player {0} left this game and cannot rejoin")]
    AlreadyLeft(String),

    #[error("Game is full")]
    GameFull,

    #[error("Not enough players: need {need}, have {have}")]
    NotEnoughPlayers { need: usize, have: usize },

    #[error("Players not ready: {}", .0.join(", "))]
    PlayersNotReady(Vec<String>),

    #[error("Already submitted for round {round}")]
    DuplicateSubmission { round: u32 },

    #[error("The game moved on before this write landed")]
    StaleWrite,

    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    #[error("Invalid option index {index}, {available} options available")]
    InvalidOption { index: usize, available: usize },

    #[error("Unknown question submission {0}")]
    UnknownSubmission(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Only the host can {0}")]
    HostOnly(&'static str),

    #[error("The host cannot {0}")]
    HostNotAllowed(&'static str),

    #[error("The hot-seat player cannot {0}")]
    HotSeatNotAllowed(&'static str),

    #[error("Phase deadline has not passed yet")]
    DeadlineNotReached,

    #[error("Payouts already distributed")]
    AlreadyDistributed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GameError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GameError::Core(e) if e.is_funds() => ErrorKind::Funds,
            GameError::Core(e) if e.is_transient() => ErrorKind::Transient,
            GameError::Core(CoreError::GameNotFound(_))
            | GameError::Core(CoreError::InvalidAddress(_))
            | GameError::Core(CoreError::InvalidAmount(_))
            | GameError::Core(CoreError::Config(_)) => ErrorKind::Validation,
            GameError::Core(_) => ErrorKind::Internal,
            GameError::HostOnly(_)
            | GameError::HostNotAllowed(_)
            | GameError::HotSeatNotAllowed(_)
            | GameError::DeadlineNotReached
            | GameError::NotInGame(_) => ErrorKind::Authority,
            GameError::Internal(_) => ErrorKind::Internal,
            _ => ErrorKind::Validation,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GameError::Internal(msg.into())
    }

    pub fn wrong_status(expected: &'static str, found: GameStatus) -> Self {
        GameError::WrongStatus { expected, found }
    }

    pub fn wrong_phase(expected: GamePhase, found: Option<GamePhase>) -> Self {
        GameError::WrongPhase {
            expected,
            found: found.map_or_else(|| "none".to_string(), |p| p.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let funds = GameError::from(CoreError::InsufficientFunds {
            need: 10,
            available: 1,
        });
        assert_eq!(funds.kind(), ErrorKind::Funds);

        let transient = GameError::from(CoreError::network("connection reset"));
        assert_eq!(transient.kind(), ErrorKind::Transient);

        assert_eq!(GameError::HostOnly("advance").kind(), ErrorKind::Authority);
        assert_eq!(
            GameError::DuplicateSubmission { round: 2 }.kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_wrong_phase_message() {
        let err = GameError::wrong_phase(GamePhase::VotingHonesty, Some(GamePhase::Answering));
        assert_eq!(
            err.to_string(),
            "Wrong phase: expected voting-honesty, found answering"
        );
    }
}
