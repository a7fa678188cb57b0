use parking_lot::RwLock;
use std::sync::Arc;

/// Tracks which game this client is currently looking at.
///
/// Every async completion carries the [`SessionToken`] it was started under and
/// is dropped if the client has since left or switched games.
#[derive(Debug, Clone, Default)]
pub struct ClientSession {
    inner: Arc<RwLock<SessionState>>,
}

#[derive(Debug, Default)]
struct SessionState {
    game_id: Option<String>,
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    game_id: String,
    generation: u64,
}

impl SessionToken {
    pub fn game_id(&self) -> &str {
        &self.game_id
    }
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to a game, invalidating every token handed out before.
    pub fn enter(&self, game_id: &str) -> SessionToken {
        let mut state = self.inner.write();
        state.generation += 1;
        state.game_id = Some(game_id.to_string());
        tracing::debug!("Entered game {} (generation {})", game_id, state.generation);

        SessionToken {
            game_id: game_id.to_string(),
            generation: state.generation,
        }
    }

    pub fn leave(&self) {
        let mut state = self.inner.write();
        state.generation += 1;
        state.game_id = None;
    }

    pub fn is_current(&self, token: &SessionToken) -> bool {
        let state = self.inner.read();
        state.generation == token.generation && state.game_id.as_deref() == Some(&token.game_id)
    }

    /// Pass a completed result through only if its session is still current.
    pub fn guard<T>(&self, token: &SessionToken, value: T) -> Option<T> {
        if self.is_current(token) {
            Some(value)
        } else {
            tracing::debug!("Discarding result for stale session on game {}", token.game_id);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_go_stale_on_switch() {
        let session = ClientSession::new();
        let first = session.enter("g1");
        assert!(session.is_current(&first));

        let second = session.enter("g2");
        assert!(!session.is_current(&first));
        assert!(session.is_current(&second));
        assert_eq!(session.guard(&first, 1), None);
        assert_eq!(session.guard(&second, 2), Some(2));

        session.leave();
        assert!(!session.is_current(&second));
    }

    #[test]
    fn test_reentering_same_game_invalidates_old_token() {
        let session = ClientSession::new();
        let old = session.enter("g1");
        let new = session.enter("g1");
        assert!(!session.is_current(&old));
        assert!(session.is_current(&new));
    }
}
