//! The live session table.
//!
//! The lock is held only for lookups and in-place updates, never across an
//! await point; callers snapshot what they need and re-enter afterwards.

use secrecy::SecretString;
use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::debug;
use uuid::Uuid;

use super::{
    crypto,
    error::Error,
    session::{Session, SessionPurpose},
};

#[derive(Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    attempts: AtomicU64,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new session and return its id and payload key.
    pub fn create(
        &self,
        username: &str,
        language: &str,
        purpose: SessionPurpose,
    ) -> (String, SecretString) {
        let key = crypto::generate_key();
        let mut table = self.table();
        loop {
            let id = Uuid::new_v4().to_string();
            if let Entry::Vacant(slot) = table.entry(id.clone()) {
                slot.insert(Session::new(
                    id.clone(),
                    username.to_string(),
                    language.to_string(),
                    purpose,
                    key.clone(),
                ));
                debug!(session_id = %id, "session created");
                return (id, key);
            }
        }
    }

    /// Run `f` on the session while holding the table lock.
    ///
    /// # Errors
    /// Returns `UnknownSession` if the id is not live, or whatever `f` returns.
    pub(crate) fn with_session<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let mut table = self.table();
        let session = table
            .get_mut(id)
            .ok_or_else(|| Error::UnknownSession(id.to_string()))?;
        f(session)
    }

    pub(crate) fn next_attempt_id(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::Relaxed)
    }

    /// Remove a session, cancelling its attempt. `false` if it was not live.
    pub fn end(&self, id: &str) -> bool {
        let removed = self.table().remove(id);
        match removed {
            Some(mut session) => {
                session.cancel_attempt();
                debug!(session_id = %id, "session ended");
                true
            }
            None => false,
        }
    }

    /// Remove every session, cancelling their attempts.
    pub fn end_all(&self) -> usize {
        let drained: Vec<Session> = self.table().drain().map(|(_, s)| s).collect();
        let count = drained.len();
        for mut session in drained {
            session.cancel_attempt();
        }
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
