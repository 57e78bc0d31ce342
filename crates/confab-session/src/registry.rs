use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

type SessionKey = (String, String);

/// Live sessions by `(thread_id, message_id)`.
///
/// A session is reachable through both its reply id and the id of the user
/// message it answers.
#[derive(Debug, Clone, Default)]
pub struct CancelRegistry {
    sessions: Arc<Mutex<HashMap<SessionKey, CancellationToken>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        thread_id: &str,
        message_ids: &[&str],
        token: CancellationToken,
    ) -> Registration {
        let keys: Vec<SessionKey> = message_ids
            .iter()
            .map(|id| (thread_id.to_string(), id.to_string()))
            .collect();

        let mut sessions = self.lock();
        for key in &keys {
            sessions.insert(key.clone(), token.clone());
        }

        Registration {
            registry: self.clone(),
            keys,
        }
    }

    /// Signal the matching session. Returns `false` when none is live.
    pub fn cancel(&self, thread_id: &str, message_id: &str) -> bool {
        let key = (thread_id.to_string(), message_id.to_string());
        match self.lock().get(&key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self, thread_id: &str, message_id: &str) -> bool {
        self.lock()
            .contains_key(&(thread_id.to_string(), message_id.to_string()))
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    fn remove(&self, keys: &[SessionKey]) {
        let mut sessions = self.lock();
        for key in keys {
            sessions.remove(key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionKey, CancellationToken>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a session cancellable until released or dropped
#[derive(Debug)]
pub struct Registration {
    registry: CancelRegistry,
    keys: Vec<SessionKey>,
}

impl Registration {
    /// Stop accepting cancel requests. Any cancel that landed earlier is
    /// still visible on the token.
    pub fn release(&mut self) {
        let keys = std::mem::take(&mut self.keys);
        self.registry.remove(&keys);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_by_either_id() {
        let registry = CancelRegistry::new();
        let token = CancellationToken::new();
        let _registration = registry.register("t1", &["reply", "user"], token.clone());

        assert!(!registry.cancel("t2", "reply"));
        assert!(!token.is_cancelled());

        assert!(registry.cancel("t1", "user"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_release_and_drop_unregister() {
        let registry = CancelRegistry::new();
        let mut registration = registry.register("t1", &["a"], CancellationToken::new());
        assert!(registry.is_live("t1", "a"));

        registration.release();
        assert!(!registry.cancel("t1", "a"));

        {
            let _scoped = registry.register("t1", &["b"], CancellationToken::new());
            assert_eq!(registry.live_count(), 1);
        }
        assert_eq!(registry.live_count(), 0);
    }
}
