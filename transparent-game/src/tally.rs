//! Vote tallies. Every tie is broken toward the lowest index so all clients
//! compute the same winner from the same rows.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use transparent_core::types::{
    GameSnapshot, PickVoteRecord, SubmittedQuestion, VoteRecord, VoteValue, WalletAddress,
};

/// Index of the largest count; the first one wins a tie. `None` for no entries.
pub fn argmax_first(counts: &[u32]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (index, &count) in counts.iter().enumerate() {
        match best {
            Some((_, top)) if count <= top => {}
            _ => best = Some((index, count)),
        }
    }
    best.map(|(index, _)| index)
}

/// Votes per option index. Out-of-range indices are ignored.
pub fn pick_counts(votes: &[PickVoteRecord], option_count: usize) -> Vec<u32> {
    let mut counts = vec![0u32; option_count];
    for vote in votes {
        if let Some(count) = counts.get_mut(vote.option_index) {
            *count += 1;
        }
    }
    counts
}

/// Winning option of the picking phase; option 0 when nobody voted.
pub fn pick_winner(votes: &[PickVoteRecord], option_count: usize) -> Option<usize> {
    argmax_first(&pick_counts(votes, option_count))
}

/// Winning submission in submission order.
pub fn submission_winner(submissions: &[SubmittedQuestion]) -> Option<&SubmittedQuestion> {
    let counts: Vec<u32> = submissions.iter().map(|s| s.votes).collect();
    argmax_first(&counts).map(|i| &submissions[i])
}

/// Submissions by votes, highest first, ties in submission order.
pub fn rank_submissions(submissions: &[SubmittedQuestion]) -> Vec<&SubmittedQuestion> {
    let mut ranked: Vec<&SubmittedQuestion> = submissions.iter().collect();
    ranked.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.seq.cmp(&b.seq)));
    ranked
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HonestyTally {
    pub transparent: u32,
    pub fake: u32,
}

impl HonestyTally {
    pub fn add(&mut self, vote: VoteValue) {
        match vote {
            VoteValue::Transparent => self.transparent += 1,
            VoteValue::Fake => self.fake += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.transparent + self.fake
    }

    /// transparent / (transparent + fake), zero when nobody voted.
    pub fn ratio(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.transparent as f64 / self.total() as f64
        }
    }
}

pub fn round_tally<'a>(votes: impl IntoIterator<Item = &'a VoteRecord>) -> HonestyTally {
    let mut tally = HonestyTally::default();
    for vote in votes {
        tally.add(vote.vote);
    }
    tally
}

/// Accumulated honesty score of one contestant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub wallet: WalletAddress,
    pub name: String,
    pub tally: HonestyTally,
    pub rounds_in_hot_seat: u32,
}

impl Score {
    pub fn honesty_ratio(&self) -> f64 {
        self.tally.ratio()
    }
}

/// Scores for every contestant in join order, built from the votes cast while
/// each of them sat in the hot seat.
pub fn scores(snapshot: &GameSnapshot) -> Vec<Score> {
    let hot_seats: HashMap<u32, &WalletAddress> = snapshot
        .rounds
        .iter()
        .map(|r| (r.round, &r.hot_seat))
        .collect();

    let mut scores: Vec<Score> = snapshot
        .contestants()
        .map(|p| Score {
            wallet: p.wallet.clone(),
            name: p.name.clone(),
            tally: HonestyTally::default(),
            rounds_in_hot_seat: 0,
        })
        .collect();

    for round in &snapshot.rounds {
        if let Some(score) = scores.iter_mut().find(|s| s.wallet == round.hot_seat) {
            score.rounds_in_hot_seat += 1;
        }
    }

    for vote in &snapshot.votes {
        let Some(hot_seat) = hot_seats.get(&vote.round) else {
            continue;
        };
        // Self-votes never reach the store, but skip them anyway
        if &vote.voter == *hot_seat {
            continue;
        }
        if let Some(score) = scores.iter_mut().find(|s| &s.wallet == *hot_seat) {
            score.tally.add(vote.vote);
        }
    }

    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pick(index: usize) -> PickVoteRecord {
        PickVoteRecord {
            round: 1,
            voter: WalletAddress::parse(&format!("v{}", index)).unwrap(),
            option_index: index,
        }
    }

    #[test]
    fn test_first_max_wins_ties() {
        assert_eq!(argmax_first(&[2, 2, 1]), Some(0));
        assert_eq!(argmax_first(&[1, 3, 3]), Some(1));
        assert_eq!(argmax_first(&[0, 0, 0]), Some(0));
        assert_eq!(argmax_first(&[]), None);
    }

    #[test]
    fn test_pick_counts_ignore_out_of_range() {
        let votes = vec![pick(0), pick(1), pick(1), pick(9)];
        assert_eq!(pick_counts(&votes, 3), vec![1, 2, 0]);
        assert_eq!(pick_winner(&votes, 3), Some(1));
        assert_eq!(pick_winner(&[], 3), Some(0));
    }

    #[test]
    fn test_honesty_ratio() {
        let tally = HonestyTally {
            transparent: 3,
            fake: 1,
        };
        assert_eq!(tally.ratio(), 0.75);
        assert_eq!(HonestyTally::default().ratio(), 0.0);
    }

    #[test]
    fn test_rank_submissions_breaks_ties_by_order() {
        let make = |id: &str, votes: u32, seq: u32| SubmittedQuestion {
            id: id.to_string(),
            game_id: "g".to_string(),
            round: 1,
            submitter: WalletAddress::parse(id).unwrap(),
            text: id.to_string(),
            votes,
            seq,
        };
        let submissions = vec![make("a", 1, 1), make("b", 2, 2), make("c", 2, 3)];
        let ranked: Vec<_> = rank_submissions(&submissions).iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ranked, vec!["b", "c", "a"]);
        assert_eq!(submission_winner(&submissions).unwrap().id, "b");
    }
}
