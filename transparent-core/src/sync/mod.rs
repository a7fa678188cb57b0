pub mod local;
pub mod session;

pub use local::{snapshot_hash, Intent, LocalStore, PendingIntents};
pub use session::{ClientSession, SessionToken};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::storage::Storage;
use crate::types::GameStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Keeps a [`LocalStore`] in step with the stored game.
///
/// Change events trigger an immediate refetch; a fixed-interval pull covers
/// anything the push channel dropped. Either way the whole snapshot is
/// replaced, so the most recent fetch wins.
pub struct GameSync {
    storage: Arc<Storage>,
    local: Arc<LocalStore>,
    session: ClientSession,
    intents: Option<Arc<PendingIntents>>,
    pull_waiting: Duration,
    pull_playing: Duration,
}

impl GameSync {
    pub fn new(storage: Arc<Storage>, config: &EngineConfig, session: ClientSession) -> Self {
        Self {
            storage,
            local: Arc::new(LocalStore::new()),
            session,
            intents: None,
            pull_waiting: config.pull_interval_waiting,
            pull_playing: config.pull_interval_playing,
        }
    }

    /// Reconcile this client's optimistic intents on every refresh.
    pub fn with_intents(mut self, intents: Arc<PendingIntents>) -> Self {
        self.intents = Some(intents);
        self
    }

    pub fn local(&self) -> Arc<LocalStore> {
        self.local.clone()
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// Fetch the full game state and apply it if the session is still current.
    /// Returns true when the local view changed.
    pub async fn refresh(&self, token: &SessionToken) -> Result<bool> {
        let snapshot = self.storage.load_snapshot(token.game_id()).await?;

        let Some(snapshot) = self.session.guard(token, snapshot) else {
            return Ok(false);
        };

        if let Some(intents) = &self.intents {
            intents.reconcile(&snapshot);
        }

        let changed = self.local.replace(snapshot)?;
        if changed {
            tracing::debug!("Refreshed local view of game {}", token.game_id());
        }
        Ok(changed)
    }

    pub fn spawn(self, token: SessionToken, stop: CancellationToken) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run(token, stop))
    }

    /// Run until `stop` fires or the session moves to another game.
    pub async fn run(self, token: SessionToken, stop: CancellationToken) -> Result<()> {
        let mut changes = self.storage.subscribe();
        let mut push_open = true;

        self.refresh_quietly(&token).await;

        let mut period = self.pull_interval();
        let mut pull = interval_at(Instant::now() + period, period);
        pull.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Syncing game {}", token.game_id());

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    tracing::debug!("Sync for game {} stopped", token.game_id());
                    break;
                }
                event = changes.recv(), if push_open => {
                    match event {
                        Ok(event) if event.game_id == token.game_id() => {
                            self.refresh_quietly(&token).await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!("Push channel lagged by {} events, refetching", missed);
                            self.refresh_quietly(&token).await;
                        }
                        Err(RecvError::Closed) => {
                            tracing::warn!("Push channel closed, relying on pull");
                            push_open = false;
                        }
                    }
                }
                _ = pull.tick() => {
                    self.refresh_quietly(&token).await;
                }
            }

            if !self.session.is_current(&token) {
                tracing::debug!("Session left game {}, stopping sync", token.game_id());
                self.local.clear();
                break;
            }

            let wanted = self.pull_interval();
            if wanted != period {
                period = wanted;
                pull = interval_at(Instant::now() + period, period);
                pull.set_missed_tick_behavior(MissedTickBehavior::Delay);
            }
        }

        Ok(())
    }

    // Sync failures never block the client; the next pull retries.
    async fn refresh_quietly(&self, token: &SessionToken) {
        if let Err(e) = self.refresh(token).await {
            if e.is_transient() {
                tracing::debug!("Transient sync failure for {}: {}", token.game_id(), e);
            } else {
                tracing::warn!("Sync failure for {}: {}", token.game_id(), e);
            }
        }
    }

    fn pull_interval(&self) -> Duration {
        match self.local.current().map(|s| s.game.status) {
            Some(GameStatus::Playing) => self.pull_playing,
            _ => self.pull_waiting,
        }
    }
}
