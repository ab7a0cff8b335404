//! Set of live sessions for one server instance.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use wsdrain_core::SessionId;

use crate::session::Session;

/// Registry of all live sessions.
///
/// Every operation takes the same exclusive lock. Callers that need to do
/// I/O across members take a [`snapshot`](Self::snapshot) first.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session. The caller guarantees it is not already present.
    pub fn add(&self, session: Arc<Session>) {
        let _ = self.sessions.lock().insert(session.id().clone(), session);
    }

    /// Remove a session by id. Absent ids are a no-op; returns whether
    /// anything was removed.
    pub fn remove(&self, id: &SessionId) -> bool {
        self.sessions.lock().remove(id).is_some()
    }

    /// Point-in-time copy of all members.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().contains_key(id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
