//! Session registry and lifecycle operations.
//!
//! Owns the `session_id → SessionEntry` map. The map lock is held only for
//! add/remove/lookup; each entry carries its own session lock for turn
//! mutual exclusion. Cancellation goes through the entry's out-of-band
//! turn handle so it never waits on a lock a running turn is holding.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info};

use crate::guard::ResourceGuard;
use crate::session::model::{PermissionMode, Session, SessionEntry};
use crate::{AppError, Result};

/// Registry of live sessions.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<SessionEntry>>>,
    guard: Arc<ResourceGuard>,
    default_mode: PermissionMode,
}

impl SessionManager {
    /// Create a manager backed by the given resource guard.
    #[must_use]
    pub fn new(guard: Arc<ResourceGuard>, default_mode: PermissionMode) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            guard,
            default_mode,
        }
    }

    /// Create a fresh session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`] if the resource guard denies admission.
    pub fn create(&self, cwd: PathBuf, mcp_servers: Vec<Value>) -> Result<Arc<SessionEntry>> {
        let session = Session::new(cwd, mcp_servers, self.default_mode);
        self.insert(session)
    }

    /// Adopt a host-supplied session id.
    ///
    /// If the id is already present the existing entry is returned; session
    /// state is process-lifetime only, so an unknown id gets a fresh session
    /// bound to it (no history replay).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`] if a new session is needed and the
    /// guard denies admission.
    pub fn adopt(
        &self,
        session_id: &str,
        cwd: PathBuf,
        mcp_servers: Vec<Value>,
    ) -> Result<Arc<SessionEntry>> {
        {
            let sessions = self.lock_map();
            if let Some(entry) = sessions.get(session_id) {
                debug!(session_id, "session re-adopted");
                return Ok(Arc::clone(entry));
            }
        }
        let session = Session::with_id(
            session_id.to_owned(),
            cwd,
            mcp_servers,
            self.default_mode,
        );
        self.insert(session)
    }

    /// Look up a session by id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionNotFound`] for unknown ids.
    pub fn get(&self, session_id: &str) -> Result<Arc<SessionEntry>> {
        let sessions = self.lock_map();
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_owned()))
    }

    /// Fire the cancel token of the session's in-flight turn. Idempotent;
    /// unknown ids and idle sessions are no-ops.
    pub fn cancel(&self, session_id: &str) {
        let entry = {
            let sessions = self.lock_map();
            sessions.get(session_id).cloned()
        };
        if let Some(entry) = entry {
            info!(session_id, "cancelling in-flight turn");
            entry.cancel_turn();
        } else {
            debug!(session_id, "cancel for unknown session, ignoring");
        }
    }

    /// Cancel the in-flight turn, release the guard slot, and drop the
    /// session from the registry. Idempotent.
    pub fn dispose(&self, session_id: &str) {
        let removed = {
            let mut sessions = self.lock_map();
            sessions.remove(session_id)
        };
        if let Some(entry) = removed {
            entry.cancel_turn();
            self.guard.remove_session(session_id);
            info!(session_id, "session disposed");
        }
    }

    /// Dispose every session (shutdown path).
    pub fn dispose_all(&self) {
        let drained: Vec<_> = {
            let mut sessions = self.lock_map();
            sessions.drain().collect()
        };
        for (id, entry) in drained {
            entry.cancel_turn();
            self.guard.remove_session(&id);
        }
        info!("all sessions disposed");
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_map().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_map().is_empty()
    }

    fn insert(&self, session: Session) -> Result<Arc<SessionEntry>> {
        self.guard.add_session(&session.id)?;
        let id = session.id.clone();
        let entry = Arc::new(SessionEntry::new(session));
        let mut sessions = self.lock_map();
        sessions.insert(id.clone(), Arc::clone(&entry));
        info!(session_id = %id, total = sessions.len(), "session created");
        Ok(entry)
    }

    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SessionEntry>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
