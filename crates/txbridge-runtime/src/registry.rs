use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use txbridge_core::{BridgeError, BridgeErrorCategory};

/// Live sessions of one coordinator, keyed by caller-chosen session id.
#[derive(Debug)]
pub struct SessionRegistry<S> {
    sessions: Mutex<HashMap<String, Arc<S>>>,
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> SessionRegistry<S> {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<S>>>, BridgeError> {
        self.sessions.lock().map_err(|_| {
            BridgeError::new(
                BridgeErrorCategory::Internal,
                "registry_poisoned",
                "session registry lock is poisoned",
            )
        })
    }

    /// Register a new session; rejects ids that are still live.
    pub fn insert(&self, session_id: &str, session: Arc<S>) -> Result<(), BridgeError> {
        let mut sessions = self.lock()?;
        if sessions.contains_key(session_id) {
            return Err(BridgeError::session_exists(session_id));
        }
        sessions.insert(session_id.to_owned(), session);
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Result<Arc<S>, BridgeError> {
        self.lock()?
            .get(session_id)
            .cloned()
            .ok_or_else(|| BridgeError::session_not_found(session_id))
    }

    /// Remove and return a session regardless of which instance is
    /// registered. `None` when the id is unknown or already released.
    pub fn take(&self, session_id: &str) -> Result<Option<Arc<S>>, BridgeError> {
        Ok(self.lock()?.remove(session_id))
    }

    /// Remove `session` only if it is still the instance registered under
    /// `session_id`. A disposed id may already belong to a newer session.
    pub fn release(&self, session_id: &str, session: &Arc<S>) {
        if let Ok(mut sessions) = self.lock()
            && sessions
                .get(session_id)
                .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(session_id);
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock()
            .map(|sessions| sessions.contains_key(session_id))
            .unwrap_or(false)
    }

    /// Snapshot of all live sessions.
    pub fn all(&self) -> Vec<Arc<S>> {
        self.lock()
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|sessions| sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
