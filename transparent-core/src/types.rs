use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Amount of SOL in lamports.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Lamports(pub u64);

impl Lamports {
    pub const ZERO: Lamports = Lamports(0);

    pub fn from_sol(sol: f64) -> Result<Self> {
        if !sol.is_finite() || sol < 0.0 {
            return Err(CoreError::InvalidAmount(format!("{} SOL", sol)));
        }
        Ok(Self((sol * LAMPORTS_PER_SOL as f64).round() as u64))
    }

    pub fn to_sol(self) -> f64 {
        self.0 as f64 / LAMPORTS_PER_SOL as f64
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Lamports) -> Result<Lamports> {
        self.0
            .checked_add(other.0)
            .map(Lamports)
            .ok_or_else(|| CoreError::InvalidAmount("lamport overflow".to_string()))
    }

    pub fn saturating_sub(self, other: Lamports) -> Lamports {
        Lamports(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Lamports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} SOL", self.to_sol())
    }
}

impl std::iter::Sum for Lamports {
    fn sum<I: Iterator<Item = Lamports>>(iter: I) -> Self {
        Lamports(iter.map(|l| l.0).sum())
    }
}

/// Wallet address, the only player identity key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > 64 {
            return Err(CoreError::InvalidAddress(raw.to_string()));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(CoreError::InvalidAddress(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Escrow address holding the stakes of a game.
    pub fn pot_for(game_id: &str) -> Self {
        Self(format!("pot_{}", game_id))
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WalletAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(CoreError::internal(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GameStatus {
    Waiting,
    Playing,
    Gameover,
    Cancelled,
}

string_enum!(GameStatus {
    Waiting => "waiting",
    Playing => "playing",
    Gameover => "gameover",
    Cancelled => "cancelled",
});

impl GameStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Waiting | Self::Playing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Gameover | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GamePhase {
    SubmittingQuestions,
    VotingQuestion,
    PickingQuestion,
    Answering,
    VotingHonesty,
}

string_enum!(GamePhase {
    SubmittingQuestions => "submitting-questions",
    VotingQuestion => "voting-question",
    PickingQuestion => "picking-question",
    Answering => "answering",
    VotingHonesty => "voting-honesty",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionMode {
    Classic,
    HotTake,
    Custom,
}

string_enum!(QuestionMode {
    Classic => "classic",
    HotTake => "hot-take",
    Custom => "custom",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayoutMode {
    WinnerTakeAll,
    SplitPot,
}

string_enum!(PayoutMode {
    WinnerTakeAll => "winner-take-all",
    SplitPot => "split-pot",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VoteValue {
    Transparent,
    Fake,
}

string_enum!(VoteValue {
    Transparent => "transparent",
    Fake => "fake",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayoutKind {
    Pot,
    Prediction,
    /// Cancellation refund of everything a wallet paid in.
    Refund,
    /// Buy-in returned to a player who left before the start.
    LeaveRefund,
}

string_enum!(PayoutKind {
    Pot => "pot",
    Prediction => "prediction",
    Refund => "refund",
    LeaveRefund => "leave-refund",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContributionKind {
    BuyIn,
    Raise,
    Prediction,
}

string_enum!(ContributionKind {
    BuyIn => "buy-in",
    Raise => "raise",
    Prediction => "prediction",
});

/// One row of the `games` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: String,
    pub room_code: String,
    pub room_name: String,
    pub host_wallet: WalletAddress,
    pub buy_in: Lamports,
    pub payout_mode: PayoutMode,
    pub question_mode: QuestionMode,
    /// Questions drawn from in classic/custom mode and used to pad hot-take options.
    pub question_deck: Vec<String>,
    pub used_questions: Vec<usize>,
    pub status: GameStatus,
    pub game_phase: Option<GamePhase>,
    pub current_round: u32,
    /// Planned rounds; zero means one round per non-host player.
    pub num_questions: u32,
    pub hot_seat: Option<WalletAddress>,
    pub current_question: Option<String>,
    pub question_options: Vec<String>,
    pub current_pot: Lamports,
    /// Accepted submissions for the current phase; feeds quorum detection.
    pub vote_count: u32,
    pub phase_deadline: Option<DateTime<Utc>>,
    pub winner: Option<WalletAddress>,
    pub distributed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GameRecord {
    pub fn pot_address(&self) -> WalletAddress {
        WalletAddress::pot_for(&self.id)
    }

    pub fn is_host(&self, wallet: &WalletAddress) -> bool {
        &self.host_wallet == wallet
    }

    pub fn is_hot_seat(&self, wallet: &WalletAddress) -> bool {
        self.hot_seat.as_ref() == Some(wallet)
    }

    /// Room code formatted as `123-456`.
    pub fn display_code(&self) -> String {
        if self.room_code.len() == 6 {
            format!("{}-{}", &self.room_code[..3], &self.room_code[3..])
        } else {
            self.room_code.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub game_id: String,
    pub wallet: WalletAddress,
    pub name: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub has_paid: bool,
    pub join_seq: u32,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub game_id: String,
    pub round: u32,
    pub hot_seat: WalletAddress,
    pub question: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub game_id: String,
    pub round: u32,
    pub voter: WalletAddress,
    pub vote: VoteValue,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedQuestion {
    pub id: String,
    pub game_id: String,
    pub round: u32,
    pub submitter: WalletAddress,
    pub text: String,
    pub votes: u32,
    pub seq: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionVoteRecord {
    pub round: u32,
    pub voter: WalletAddress,
    pub submission_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickVoteRecord {
    pub round: u32,
    pub voter: WalletAddress,
    pub option_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: String,
    pub game_id: String,
    pub bettor: WalletAddress,
    pub bettor_name: String,
    pub predicted_winner: WalletAddress,
    pub amount: Lamports,
    /// Submission order within the game.
    pub seq: u32,
    pub settled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub game_id: String,
    pub wallet: WalletAddress,
    pub amount: Lamports,
    pub kind: ContributionKind,
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

/// A recorded payout; `signature` is set once the transfer went through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub game_id: String,
    pub wallet: WalletAddress,
    pub kind: PayoutKind,
    pub amount: Lamports,
    pub signature: Option<String>,
}

impl PayoutRecord {
    pub fn is_paid(&self) -> bool {
        self.signature.is_some()
    }
}

/// Full read model of one game as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub game: GameRecord,
    /// Players in join order.
    pub players: Vec<PlayerRecord>,
    pub rounds: Vec<RoundRecord>,
    /// Honesty votes of every round.
    pub votes: Vec<VoteRecord>,
    /// Submissions of the current round in submission order.
    pub submissions: Vec<SubmittedQuestion>,
    pub question_votes: Vec<QuestionVoteRecord>,
    pub pick_votes: Vec<PickVoteRecord>,
    /// Predictions in submission order.
    pub predictions: Vec<PredictionRecord>,
    pub payouts: Vec<PayoutRecord>,
    pub fetched_at: DateTime<Utc>,
}

impl GameSnapshot {
    pub fn player(&self, wallet: &WalletAddress) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| &p.wallet == wallet)
    }

    /// Non-host players in join order.
    pub fn contestants(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.players.iter().filter(|p| !p.is_host)
    }

    pub fn round_votes(&self, round: u32) -> impl Iterator<Item = &VoteRecord> {
        self.votes.iter().filter(move |v| v.round == round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lamports_from_sol() {
        assert_eq!(Lamports::from_sol(0.1).unwrap(), Lamports(100_000_000));
        assert_eq!(Lamports::from_sol(0.15).unwrap(), Lamports(150_000_000));
        assert!(Lamports::from_sol(-1.0).is_err());
        assert!(Lamports::from_sol(f64::NAN).is_err());
    }

    #[test]
    fn test_enum_round_trip_strings() {
        assert_eq!(
            "voting-honesty".parse::<GamePhase>().unwrap(),
            GamePhase::VotingHonesty
        );
        assert_eq!(PayoutMode::WinnerTakeAll.as_str(), "winner-take-all");
        assert!("voting".parse::<GameStatus>().is_err());
    }

    #[test]
    fn test_wallet_address_validation() {
        assert!(WalletAddress::parse("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU").is_ok());
        assert!(WalletAddress::parse("").is_err());
        assert!(WalletAddress::parse("has space").is_err());
        assert_eq!(WalletAddress::pot_for("abc").as_str(), "pot_abc");
    }
}
