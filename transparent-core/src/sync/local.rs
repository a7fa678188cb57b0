use crate::error::Result;
use crate::types::{GamePhase, GameSnapshot, GameStatus, WalletAddress};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

/// Client-side cache of the last confirmed game state.
///
/// Only the sync layer writes here; every write replaces the whole snapshot.
pub struct LocalStore {
    tx: watch::Sender<Option<Arc<GameSnapshot>>>,
    last_hash: Mutex<Option<String>>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            last_hash: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<GameSnapshot>>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<Arc<GameSnapshot>> {
        self.tx.borrow().clone()
    }

    /// Replace the cached snapshot. Returns false, without notifying
    /// subscribers, when the stored content has not changed.
    pub fn replace(&self, snapshot: GameSnapshot) -> Result<bool> {
        let hash = snapshot_hash(&snapshot)?;

        let mut last = self.last_hash.lock();
        if last.as_deref() == Some(hash.as_str()) {
            return Ok(false);
        }
        *last = Some(hash);

        self.tx.send_replace(Some(Arc::new(snapshot)));
        Ok(true)
    }

    pub fn clear(&self) {
        *self.last_hash.lock() = None;
        self.tx.send_replace(None);
    }
}

/// Content hash of a snapshot, ignoring when it was fetched.
pub fn snapshot_hash(snapshot: &GameSnapshot) -> Result<String> {
    let content = serde_json::to_vec(&(
        &snapshot.game,
        &snapshot.players,
        &snapshot.rounds,
        &snapshot.votes,
        &snapshot.submissions,
        &snapshot.question_votes,
        &snapshot.pick_votes,
        &snapshot.predictions,
        &snapshot.payouts,
    ))?;

    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(hex::encode(hasher.finalize()))
}

/// An action this client has sent but not yet seen confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Intent {
    Ready,
    SubmitQuestion { round: u32 },
    VoteQuestion { round: u32 },
    PickQuestion { round: u32 },
    HonestyVote { round: u32 },
}

impl Intent {
    /// The action `wallet` owes in the snapshot's current phase, if any.
    pub fn expected(snapshot: &GameSnapshot, wallet: &WalletAddress) -> Option<Self> {
        let game = &snapshot.game;
        let contestant = snapshot.player(wallet).is_some_and(|p| !p.is_host);
        if !contestant {
            return None;
        }

        let round = game.current_round;
        match (game.status, game.game_phase) {
            (GameStatus::Waiting, _) => Some(Self::Ready),
            (GameStatus::Playing, _) if game.is_hot_seat(wallet) => None,
            (GameStatus::Playing, Some(GamePhase::SubmittingQuestions)) => {
                Some(Self::SubmitQuestion { round })
            }
            (GameStatus::Playing, Some(GamePhase::VotingQuestion)) => Some(Self::VoteQuestion { round }),
            (GameStatus::Playing, Some(GamePhase::PickingQuestion)) => Some(Self::PickQuestion { round }),
            (GameStatus::Playing, Some(GamePhase::VotingHonesty)) => Some(Self::HonestyVote { round }),
            _ => None,
        }
    }

    fn round(&self) -> Option<u32> {
        match self {
            Self::Ready => None,
            Self::SubmitQuestion { round }
            | Self::VoteQuestion { round }
            | Self::PickQuestion { round }
            | Self::HonestyVote { round } => Some(*round),
        }
    }

    fn is_confirmed(&self, snapshot: &GameSnapshot, wallet: &WalletAddress) -> bool {
        match self {
            Self::Ready => snapshot.player(wallet).is_some_and(|p| p.is_ready),
            Self::SubmitQuestion { round } => snapshot
                .submissions
                .iter()
                .any(|s| s.round == *round && &s.submitter == wallet),
            Self::VoteQuestion { round } => snapshot
                .question_votes
                .iter()
                .any(|v| v.round == *round && &v.voter == wallet),
            Self::PickQuestion { round } => snapshot
                .pick_votes
                .iter()
                .any(|v| v.round == *round && &v.voter == wallet),
            Self::HonestyVote { round } => snapshot
                .votes
                .iter()
                .any(|v| v.round == *round && &v.voter == wallet),
        }
    }
}

/// Optimistic overlay for one client's own actions.
///
/// Used only to disable already-clicked controls. Tallies are always computed
/// from the confirmed snapshot.
pub struct PendingIntents {
    wallet: WalletAddress,
    pending: Mutex<HashSet<Intent>>,
}

impl PendingIntents {
    pub fn new(wallet: WalletAddress) -> Self {
        Self {
            wallet,
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn wallet(&self) -> &WalletAddress {
        &self.wallet
    }

    pub fn record(&self, intent: Intent) {
        self.pending.lock().insert(intent);
    }

    /// Drop an intent whose write was rejected.
    pub fn forget(&self, intent: &Intent) {
        self.pending.lock().remove(intent);
    }

    pub fn is_pending(&self, intent: &Intent) -> bool {
        self.pending.lock().contains(intent)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Confirmed in the snapshot or still in flight.
    pub fn has_acted(&self, snapshot: &GameSnapshot, intent: &Intent) -> bool {
        intent.is_confirmed(snapshot, &self.wallet) || self.is_pending(intent)
    }

    /// Clear intents the snapshot confirms, and those for rounds already over.
    pub fn reconcile(&self, snapshot: &GameSnapshot) {
        let current_round = snapshot.game.current_round;
        self.pending.lock().retain(|intent| {
            let stale = intent.round().is_some_and(|r| r < current_round);
            !stale && !intent.is_confirmed(snapshot, &self.wallet)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{sample_game, wallet};
    use crate::types::{GameRecord, PlayerRecord, VoteRecord, VoteValue};
    use chrono::Utc;

    fn snapshot(game: GameRecord) -> GameSnapshot {
        GameSnapshot {
            game,
            players: Vec::new(),
            rounds: Vec::new(),
            votes: Vec::new(),
            submissions: Vec::new(),
            question_votes: Vec::new(),
            pick_votes: Vec::new(),
            predictions: Vec::new(),
            payouts: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_replace_skips_identical_content() {
        let store = LocalStore::new();
        let mut rx = store.subscribe();

        let first = snapshot(sample_game("g1", "123456"));
        assert!(store.replace(first.clone()).unwrap());
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();

        let mut refetched = first.clone();
        refetched.fetched_at = Utc::now() + chrono::Duration::seconds(3);
        assert!(!store.replace(refetched).unwrap());
        assert!(!rx.has_changed().unwrap());

        let mut changed = first;
        changed.game.vote_count = 1;
        assert!(store.replace(changed).unwrap());
        assert_eq!(store.current().unwrap().game.vote_count, 1);
    }

    #[test]
    fn test_intents_clear_on_confirmation() {
        let bob = wallet("bob");
        let intents = PendingIntents::new(bob.clone());
        let mut snap = snapshot(sample_game("g1", "123456"));
        snap.game.current_round = 1;

        intents.record(Intent::HonestyVote { round: 1 });
        intents.record(Intent::Ready);
        assert!(intents.has_acted(&snap, &Intent::HonestyVote { round: 1 }));

        snap.votes.push(VoteRecord {
            game_id: "g1".to_string(),
            round: 1,
            voter: bob.clone(),
            vote: VoteValue::Fake,
            created_at: Utc::now(),
        });
        snap.players.push(PlayerRecord {
            game_id: "g1".to_string(),
            wallet: bob,
            name: "Bob".to_string(),
            is_host: false,
            is_ready: false,
            has_paid: true,
            join_seq: 1,
            joined_at: Utc::now(),
        });
        intents.reconcile(&snap);

        assert!(!intents.is_pending(&Intent::HonestyVote { round: 1 }));
        assert!(intents.is_pending(&Intent::Ready));
        assert_eq!(intents.len(), 1);
    }

    #[test]
    fn test_expected_intent_follows_phase() {
        let bob = wallet("bob");
        let mut snap = snapshot(sample_game("g1", "123456"));
        assert_eq!(Intent::expected(&snap, &bob), None);

        snap.players.push(PlayerRecord {
            game_id: "g1".to_string(),
            wallet: bob.clone(),
            name: "Bob".to_string(),
            is_host: false,
            is_ready: false,
            has_paid: true,
            join_seq: 1,
            joined_at: Utc::now(),
        });
        assert_eq!(Intent::expected(&snap, &bob), Some(Intent::Ready));

        snap.game.status = GameStatus::Playing;
        snap.game.current_round = 2;
        snap.game.game_phase = Some(GamePhase::Answering);
        assert_eq!(Intent::expected(&snap, &bob), None);

        snap.game.game_phase = Some(GamePhase::VotingHonesty);
        assert_eq!(Intent::expected(&snap, &bob), Some(Intent::HonestyVote { round: 2 }));

        snap.game.hot_seat = Some(bob.clone());
        assert_eq!(Intent::expected(&snap, &bob), None);
    }

    #[test]
    fn test_intents_from_past_rounds_are_dropped() {
        let intents = PendingIntents::new(wallet("bob"));
        let mut snap = snapshot(sample_game("g1", "123456"));
        snap.game.current_round = 3;

        intents.record(Intent::PickQuestion { round: 2 });
        intents.reconcile(&snap);
        assert!(intents.is_empty());
    }
}
