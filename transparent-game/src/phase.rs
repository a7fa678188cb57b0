//! The phase state machine.
//!
//! classic/custom: answering -> voting-honesty -> next round
//! hot-take: submitting-questions -> voting-question -> picking-question
//!           -> answering -> voting-honesty -> next round
//!
//! After the last round's voting-honesty the game is over.

use crate::deck;
use crate::error::{GameError, Result};
use crate::tally;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use transparent_core::config::PhaseDurations;
use transparent_core::storage::GameProgress;
use transparent_core::types::{
    GamePhase, GameSnapshot, GameStatus, QuestionMode, RoundRecord, WalletAddress,
};

/// Why an advance was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvanceTrigger {
    /// Host pressed "next".
    Host,
    /// The shared phase deadline passed.
    TimerExpired,
    /// Every eligible participant has submitted.
    Quorum,
}

/// First phase of every round.
pub fn initial_phase(mode: QuestionMode) -> GamePhase {
    match mode {
        QuestionMode::HotTake => GamePhase::SubmittingQuestions,
        QuestionMode::Classic | QuestionMode::Custom => GamePhase::Answering,
    }
}

/// Phase after `phase` within the same round, `None` once the round is over.
pub fn next_phase(phase: GamePhase) -> Option<GamePhase> {
    match phase {
        GamePhase::SubmittingQuestions => Some(GamePhase::VotingQuestion),
        GamePhase::VotingQuestion => Some(GamePhase::PickingQuestion),
        GamePhase::PickingQuestion => Some(GamePhase::Answering),
        GamePhase::Answering => Some(GamePhase::VotingHonesty),
        GamePhase::VotingHonesty => None,
    }
}

/// Planned number of rounds; zero means one round per contestant.
pub fn total_rounds(num_questions: u32, contestants: usize) -> u32 {
    if num_questions == 0 {
        contestants as u32
    } else {
        num_questions
    }
}

/// Next contestant in join order after `current`, wrapping.
pub fn next_hot_seat(contestants: &[WalletAddress], current: Option<&WalletAddress>) -> Option<WalletAddress> {
    if contestants.is_empty() {
        return None;
    }
    let next = match current.and_then(|c| contestants.iter().position(|w| w == c)) {
        Some(index) => (index + 1) % contestants.len(),
        None => 0,
    };
    Some(contestants[next].clone())
}

/// Players allowed to submit in the current round: contestants other than
/// the hot seat.
pub fn eligible_participants(snapshot: &GameSnapshot) -> Vec<WalletAddress> {
    snapshot
        .contestants()
        .filter(|p| !snapshot.game.is_hot_seat(&p.wallet))
        .map(|p| p.wallet.clone())
        .collect()
}

/// Voter count for progress displays; never zero.
pub fn display_voter_count(eligible: usize) -> usize {
    eligible.max(1)
}

/// Submissions needed to advance early. Answering has no quorum.
pub fn quorum(phase: GamePhase, eligible: usize) -> Option<usize> {
    match phase {
        GamePhase::Answering => None,
        _ => Some(eligible),
    }
}

pub fn quorum_reached(snapshot: &GameSnapshot) -> bool {
    let Some(phase) = snapshot.game.game_phase else {
        return false;
    };
    if snapshot.game.status != GameStatus::Playing {
        return false;
    }
    match quorum(phase, eligible_participants(snapshot).len()) {
        Some(needed) => snapshot.game.vote_count as usize >= needed,
        None => false,
    }
}

pub fn deadline_for(durations: &PhaseDurations, phase: GamePhase, now: DateTime<Utc>) -> DateTime<Utc> {
    let duration = ChronoDuration::from_std(durations.for_phase(phase))
        .unwrap_or_else(|_| ChronoDuration::seconds(60));
    now + duration
}

/// Everything an advance writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub progress: GameProgress,
    pub new_round: Option<RoundRecord>,
}

impl Transition {
    pub fn is_game_over(&self) -> bool {
        self.progress.status == GameStatus::Gameover
    }
}

/// Progress written when a waiting game starts.
pub fn plan_start<R: Rng + ?Sized>(
    snapshot: &GameSnapshot,
    durations: &PhaseDurations,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<Transition> {
    let game = &snapshot.game;
    let contestants: Vec<WalletAddress> = snapshot.contestants().map(|p| p.wallet.clone()).collect();
    let hot_seat = next_hot_seat(&contestants, None)
        .ok_or_else(|| GameError::NotEnoughPlayers { need: 1, have: 0 })?;

    Ok(begin_round(snapshot, 1, hot_seat, game.used_questions.clone(), durations, now, rng))
}

/// Work out the transition out of the stored phase.
///
/// `forced_pick` replaces the pick-vote winner when leaving picking-question.
pub fn plan_advance<R: Rng + ?Sized>(
    snapshot: &GameSnapshot,
    durations: &PhaseDurations,
    option_count: usize,
    forced_pick: Option<usize>,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<Transition> {
    let game = &snapshot.game;
    if game.status != GameStatus::Playing {
        return Err(GameError::wrong_status("playing", game.status));
    }
    let phase = game
        .game_phase
        .ok_or_else(|| GameError::internal("playing game without a phase"))?;

    let mut progress = GameProgress {
        status: GameStatus::Playing,
        phase: None,
        round: game.current_round,
        hot_seat: game.hot_seat.clone(),
        current_question: game.current_question.clone(),
        question_options: game.question_options.clone(),
        used_questions: game.used_questions.clone(),
        phase_deadline: None,
    };

    let next = match phase {
        GamePhase::SubmittingQuestions if snapshot.submissions.is_empty() => {
            // Nothing to vote on, offer deck questions straight away
            let (options, used) =
                deck::build_options(&[], &game.question_deck, &game.used_questions, option_count, rng);
            progress.question_options = options;
            progress.used_questions = used;
            GamePhase::PickingQuestion
        }
        GamePhase::VotingQuestion => {
            let ranked: Vec<String> = tally::rank_submissions(&snapshot.submissions)
                .into_iter()
                .map(|s| s.text.clone())
                .collect();
            let (options, used) =
                deck::build_options(&ranked, &game.question_deck, &game.used_questions, option_count, rng);
            progress.question_options = options;
            progress.used_questions = used;
            GamePhase::PickingQuestion
        }
        GamePhase::PickingQuestion => {
            let options = &game.question_options;
            let index = match forced_pick {
                Some(index) => index,
                None => tally::pick_winner(&snapshot.pick_votes, options.len()).unwrap_or(0),
            };
            let question = options
                .get(index)
                .cloned()
                .ok_or(GameError::InvalidOption {
                    index,
                    available: options.len(),
                })?;
            progress.current_question = Some(question);
            GamePhase::Answering
        }
        GamePhase::VotingHonesty => {
            return Ok(finish_round(snapshot, durations, now, rng));
        }
        other => next_phase(other).ok_or_else(|| GameError::internal("no phase after voting"))?,
    };

    progress.phase = Some(next);
    progress.phase_deadline = Some(deadline_for(durations, next, now));
    Ok(Transition {
        progress,
        new_round: None,
    })
}

fn finish_round<R: Rng + ?Sized>(
    snapshot: &GameSnapshot,
    durations: &PhaseDurations,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Transition {
    let game = &snapshot.game;
    let contestants: Vec<WalletAddress> = snapshot.contestants().map(|p| p.wallet.clone()).collect();
    let total = total_rounds(game.num_questions, contestants.len());
    let next_hot = next_hot_seat(&contestants, game.hot_seat.as_ref());

    match next_hot {
        Some(hot_seat) if game.current_round < total => begin_round(
            snapshot,
            game.current_round + 1,
            hot_seat,
            game.used_questions.clone(),
            durations,
            now,
            rng,
        ),
        _ => Transition {
            progress: GameProgress {
                status: GameStatus::Gameover,
                phase: None,
                round: game.current_round,
                hot_seat: None,
                current_question: None,
                question_options: Vec::new(),
                used_questions: game.used_questions.clone(),
                phase_deadline: None,
            },
            new_round: None,
        },
    }
}

fn begin_round<R: Rng + ?Sized>(
    snapshot: &GameSnapshot,
    round: u32,
    hot_seat: WalletAddress,
    used: Vec<usize>,
    durations: &PhaseDurations,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Transition {
    let game = &snapshot.game;
    let phase = initial_phase(game.question_mode);

    let (question, used) = if phase == GamePhase::Answering {
        match deck::draw_question(game.question_mode, &game.question_deck, &used, round, rng) {
            Some((question, used)) => (Some(question), used),
            None => (None, used),
        }
    } else {
        (None, used)
    };

    Transition {
        progress: GameProgress {
            status: GameStatus::Playing,
            phase: Some(phase),
            round,
            hot_seat: Some(hot_seat.clone()),
            current_question: question.clone(),
            question_options: Vec::new(),
            used_questions: used,
            phase_deadline: Some(deadline_for(durations, phase, now)),
        },
        new_round: Some(RoundRecord {
            game_id: game.id.clone(),
            round,
            hot_seat,
            question,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallets(names: &[&str]) -> Vec<WalletAddress> {
        names.iter().map(|n| WalletAddress::parse(n).unwrap()).collect()
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(initial_phase(QuestionMode::HotTake), GamePhase::SubmittingQuestions);
        assert_eq!(initial_phase(QuestionMode::Custom), GamePhase::Answering);
        assert_eq!(next_phase(GamePhase::PickingQuestion), Some(GamePhase::Answering));
        assert_eq!(next_phase(GamePhase::VotingHonesty), None);
    }

    #[test]
    fn test_rotation_wraps_in_join_order() {
        let players = wallets(&["alice", "bob", "carol"]);
        let first = next_hot_seat(&players, None).unwrap();
        let second = next_hot_seat(&players, Some(&first)).unwrap();
        let third = next_hot_seat(&players, Some(&second)).unwrap();
        let fourth = next_hot_seat(&players, Some(&third)).unwrap();
        assert_eq!(
            vec![first.as_str(), second.as_str(), third.as_str(), fourth.as_str()],
            vec!["alice", "bob", "carol", "alice"]
        );
        assert!(next_hot_seat(&[], None).is_none());
    }

    #[test]
    fn test_round_counts_and_quorum() {
        assert_eq!(total_rounds(0, 4), 4);
        assert_eq!(total_rounds(3, 4), 3);
        assert_eq!(display_voter_count(0), 1);
        assert_eq!(quorum(GamePhase::Answering, 3), None);
        assert_eq!(quorum(GamePhase::VotingHonesty, 3), Some(3));
    }
}
