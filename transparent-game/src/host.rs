//! Host-side automation: advancing on quorum or deadline and auto payouts.

use crate::engine::{AdvanceOutcome, GameEngine};
use crate::error::{ErrorKind, GameError, Result};
use crate::phase::{self, AdvanceTrigger};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use transparent_core::storage::PhaseKey;
use transparent_core::types::{GameSnapshot, GameStatus, WalletAddress};

/// Fallback wake-up when the snapshot has no deadline.
const IDLE_WAKE: Duration = Duration::from_secs(30);

/// Drives a game from the host's client.
///
/// Watches the confirmed snapshot and advances when everyone eligible has
/// submitted or the shared deadline passes. Every advance names the position
/// it was computed from, so a second host tab or a player's timer racing on
/// the same phase is harmless.
pub struct HostController {
    engine: Arc<GameEngine>,
    host: WalletAddress,
    game_id: String,
    auto_distribute: bool,
}

impl HostController {
    pub fn new(engine: Arc<GameEngine>, host: WalletAddress, game_id: impl Into<String>) -> Self {
        Self {
            engine,
            host,
            game_id: game_id.into(),
            auto_distribute: false,
        }
    }

    pub fn with_auto_distribute(mut self, enabled: bool) -> Self {
        self.auto_distribute = enabled;
        self
    }

    pub fn spawn(
        self,
        snapshots: watch::Receiver<Option<Arc<GameSnapshot>>>,
        stop: CancellationToken,
    ) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(snapshots, stop).await })
    }

    /// Run until the game ends or `stop` is cancelled.
    pub async fn run(
        &self,
        mut snapshots: watch::Receiver<Option<Arc<GameSnapshot>>>,
        stop: CancellationToken,
    ) -> Result<()> {
        tracing::info!("Host controller started for game {}", self.game_id);

        loop {
            let current = snapshots.borrow_and_update().clone();
            let deadline = match &current {
                Some(snapshot) if snapshot.game.id == self.game_id => {
                    if self.step(snapshot).await? {
                        break;
                    }
                    snapshot.game.phase_deadline
                }
                _ => None,
            };

            let wake = sleep_duration(deadline, Utc::now());

            tokio::select! {
                _ = stop.cancelled() => {
                    tracing::info!("Host controller for {} stopped", self.game_id);
                    break;
                }
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Snapshot channel closed, host controller exiting");
                        break;
                    }
                }
                _ = tokio::time::sleep(wake) => {
                    // Deadline passed with no new snapshot; re-check what we have
                    if let Some(snapshot) = current {
                        if self.step(&snapshot).await? {
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Act on one snapshot. Returns true once there is nothing left to drive.
    async fn step(&self, snapshot: &GameSnapshot) -> Result<bool> {
        let game = &snapshot.game;
        match game.status {
            GameStatus::Waiting => Ok(false),
            GameStatus::Cancelled => Ok(true),
            GameStatus::Gameover => {
                if self.auto_distribute && !game.distributed {
                    self.distribute().await;
                }
                Ok(true)
            }
            GameStatus::Playing => {
                let trigger = if phase::quorum_reached(snapshot) {
                    Some(AdvanceTrigger::Quorum)
                } else if game.phase_deadline.is_some_and(|d| d <= Utc::now()) {
                    Some(AdvanceTrigger::TimerExpired)
                } else {
                    None
                };

                if let Some(trigger) = trigger {
                    self.advance(&PhaseKey::of(game), trigger).await?;
                }
                Ok(false)
            }
        }
    }

    async fn advance(&self, key: &PhaseKey, trigger: AdvanceTrigger) -> Result<()> {
        match self
            .engine
            .advance_phase(&self.game_id, &self.host, key, trigger)
            .await
        {
            Ok(AdvanceOutcome::Advanced(next)) => {
                tracing::debug!("Host advanced {} to {:?}", self.game_id, next);
                Ok(())
            }
            Ok(AdvanceOutcome::Unchanged) => Ok(()),
            Err(GameError::DeadlineNotReached) => Ok(()),
            Err(e) if e.kind() == ErrorKind::Transient => {
                tracing::warn!("Advance of {} failed, retrying on next snapshot: {}", self.game_id, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn distribute(&self) {
        match self.engine.distribute_payouts(&self.game_id, &self.host).await {
            Ok(payouts) => tracing::info!("Auto-distributed {} payouts for {}", payouts.len(), self.game_id),
            Err(e) => tracing::error!("Auto-distribution for {} failed: {}", self.game_id, e),
        }
    }
}

fn sleep_duration(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    match deadline {
        Some(deadline) => (deadline - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(IDLE_WAKE)
            + Duration::from_millis(50),
        None => IDLE_WAKE,
    }
}

/// A single pending timeout tied to one phase; dropping it cancels it.
pub struct PhaseTimer {
    handle: JoinHandle<()>,
}

impl PhaseTimer {
    /// Run `action` once `deadline` has passed.
    pub fn schedule<F, Fut>(deadline: DateTime<Utc>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            action().await;
        });
        Self { handle }
    }

    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_sleep_duration() {
        let now = Utc::now();
        assert_eq!(sleep_duration(None, now), IDLE_WAKE);
        assert_eq!(
            sleep_duration(Some(now - chrono::Duration::seconds(5)), now),
            Duration::from_millis(50)
        );
        assert!(sleep_duration(Some(now + chrono::Duration::hours(1)), now) <= IDLE_WAKE + Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_phase_timer_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let timer = PhaseTimer::schedule(Utc::now() + chrono::Duration::milliseconds(20), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(timer.is_finished());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let timer = PhaseTimer::schedule(Utc::now() + chrono::Duration::milliseconds(50), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
