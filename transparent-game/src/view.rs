use crate::payout;
use crate::phase;
use crate::prediction;
use crate::tally::{self, HonestyTally, Score};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use transparent_core::types::{GameSnapshot, GameStatus, Lamports, WalletAddress};

/// Read model a client renders, derived entirely from a confirmed snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameView {
    pub snapshot: GameSnapshot,
    pub total_rounds: u32,
    pub scores: Vec<Score>,
    pub round_tally: HonestyTally,
    pub eligible: Vec<WalletAddress>,
    /// Eligible voters for progress bars, floored at one.
    pub voter_count: usize,
    /// Accepted submissions in the current phase.
    pub progress: u32,
    pub quorum: Option<usize>,
    pub pick_counts: Vec<u32>,
    pub pick_leader: Option<usize>,
    pub prediction_pot: Lamports,
    pub suggested_winner: Option<WalletAddress>,
    pub seconds_left: Option<i64>,
}

impl GameView {
    pub fn new(snapshot: GameSnapshot, now: DateTime<Utc>) -> Self {
        let game = &snapshot.game;
        let contestant_count = snapshot.contestants().count();
        let eligible = phase::eligible_participants(&snapshot);
        let scores = tally::scores(&snapshot);
        let pick_counts = tally::pick_counts(&snapshot.pick_votes, game.question_options.len());

        Self {
            total_rounds: phase::total_rounds(game.num_questions, contestant_count),
            round_tally: tally::round_tally(snapshot.round_votes(game.current_round)),
            voter_count: phase::display_voter_count(eligible.len()),
            progress: game.vote_count,
            quorum: game
                .game_phase
                .and_then(|p| phase::quorum(p, eligible.len())),
            pick_leader: tally::argmax_first(&pick_counts),
            pick_counts,
            prediction_pot: prediction::prediction_pot(&snapshot.predictions),
            suggested_winner: payout::suggested_winner(&scores),
            seconds_left: game
                .phase_deadline
                .filter(|_| game.status == GameStatus::Playing)
                .map(|d| (d - now).num_seconds().max(0)),
            eligible,
            scores,
            snapshot,
        }
    }

    pub fn name_of(&self, wallet: &WalletAddress) -> String {
        self.snapshot
            .player(wallet)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| wallet.to_string())
    }

    pub fn hot_seat_name(&self) -> Option<String> {
        self.snapshot.game.hot_seat.as_ref().map(|w| self.name_of(w))
    }

    /// The winner payouts are settled against: the stored one, else the suggestion.
    pub fn winner(&self) -> Option<&WalletAddress> {
        self.snapshot
            .game
            .winner
            .as_ref()
            .or(self.suggested_winner.as_ref())
    }

    pub fn is_eligible(&self, wallet: &WalletAddress) -> bool {
        self.eligible.contains(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transparent_core::types::{
        GamePhase, GameRecord, PayoutMode, PlayerRecord, QuestionMode, RoundRecord, VoteRecord,
        VoteValue,
    };

    fn wallet(raw: &str) -> WalletAddress {
        WalletAddress::parse(raw).unwrap()
    }

    fn player(name: &str, seq: u32, is_host: bool) -> PlayerRecord {
        PlayerRecord {
            game_id: "g1".to_string(),
            wallet: wallet(name),
            name: name.to_string(),
            is_host,
            is_ready: true,
            has_paid: !is_host,
            join_seq: seq,
            joined_at: Utc::now(),
        }
    }

    fn vote(voter: &str, value: VoteValue) -> VoteRecord {
        VoteRecord {
            game_id: "g1".to_string(),
            round: 1,
            voter: wallet(voter),
            vote: value,
            created_at: Utc::now(),
        }
    }

    fn snapshot() -> GameSnapshot {
        let now = Utc::now();
        GameSnapshot {
            game: GameRecord {
                id: "g1".to_string(),
                room_code: "123456".to_string(),
                room_name: "Test".to_string(),
                host_wallet: wallet("host"),
                buy_in: Lamports(100),
                payout_mode: PayoutMode::SplitPot,
                question_mode: QuestionMode::Classic,
                question_deck: vec!["Q?".to_string()],
                used_questions: vec![0],
                status: GameStatus::Playing,
                game_phase: Some(GamePhase::VotingHonesty),
                current_round: 1,
                num_questions: 0,
                hot_seat: Some(wallet("alice")),
                current_question: Some("Q?".to_string()),
                question_options: Vec::new(),
                current_pot: Lamports(300),
                vote_count: 2,
                phase_deadline: Some(now + chrono::Duration::seconds(10)),
                winner: None,
                distributed: false,
                created_at: now,
                updated_at: now,
            },
            players: vec![
                player("host", 1, true),
                player("alice", 2, false),
                player("bob", 3, false),
                player("carol", 4, false),
            ],
            rounds: vec![RoundRecord {
                game_id: "g1".to_string(),
                round: 1,
                hot_seat: wallet("alice"),
                question: Some("Q?".to_string()),
            }],
            votes: vec![vote("bob", VoteValue::Transparent), vote("carol", VoteValue::Fake)],
            submissions: Vec::new(),
            question_votes: Vec::new(),
            pick_votes: Vec::new(),
            predictions: Vec::new(),
            payouts: Vec::new(),
            fetched_at: now,
        }
    }

    #[test]
    fn test_view_derives_tallies() {
        let view = GameView::new(snapshot(), Utc::now());
        assert_eq!(view.total_rounds, 3);
        assert_eq!(view.eligible, vec![wallet("bob"), wallet("carol")]);
        assert_eq!(view.voter_count, 2);
        assert_eq!(view.quorum, Some(2));
        assert_eq!(view.round_tally, HonestyTally { transparent: 1, fake: 1 });
        assert_eq!(view.scores[0].honesty_ratio(), 0.5);
        assert_eq!(view.scores[1].tally.total(), 0);
        assert_eq!(view.hot_seat_name().as_deref(), Some("alice"));
        assert!(view.seconds_left.unwrap() <= 10);
        assert!(phase::quorum_reached(&view.snapshot));
    }
}
