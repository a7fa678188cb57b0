//! Round progression for Transparent.
//!
//! A hot-seat player answers a question out loud, everyone else votes on
//! whether the answer was honest, and the pot is paid out by honesty ratio
//! when the last round ends. [`GameEngine`] validates and applies every
//! operation; the pure modules compute what it writes.

pub mod deck;
pub mod engine;
pub mod error;
pub mod host;
pub mod payout;
pub mod phase;
pub mod prediction;
pub mod tally;
pub mod view;


pub use engine::{AdvanceOutcome, GameEngine, NewGame};
pub use error::{ErrorKind, GameError, Result};
pub use host::{HostController, PhaseTimer};
pub use phase::AdvanceTrigger;
pub use tally::{HonestyTally, Score};
pub use view::GameView;

/// Fewest questions a custom deck may hold.
pub const MIN_CUSTOM_QUESTIONS: usize = 1;
