//! Session domain model.
//!
//! A [`SessionEntry`] is the shared handle the manager hands out: the
//! mutable [`Session`] state lives behind the per-session async mutex (the
//! session lock), while the in-flight [`TurnHandle`] sits beside it so
//! `session/cancel` can fire the token without contending for the lock a
//! running turn is holding.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::{PlanEntry, ToolCallLocation, ToolCallStatus, ToolKind};

/// Per-session policy governing automatic approval of tool calls.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Confirm dangerous operations; allow the rest.
    #[default]
    Default,
    /// Additionally allow edits without confirmation.
    AcceptEdits,
    /// Allow everything without confirmation.
    BypassPermissions,
    /// Planning mode; same confirmation rules as default.
    Plan,
}

/// Handle for the single in-flight turn of a session.
#[derive(Debug)]
pub struct TurnHandle {
    /// Fires on `session/cancel` or session disposal.
    pub cancel: CancellationToken,
    /// When the turn started.
    pub started_at: DateTime<Utc>,
    /// Backend events consumed so far.
    pub event_count: u64,
}

impl TurnHandle {
    /// Create a fresh handle with its own cancel token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
            event_count: 0,
        }
    }
}

impl Default for TurnHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Live record of one tool call within a turn.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    /// Bridge- or backend-assigned identifier.
    pub id: String,
    /// Categorization for the host.
    pub kind: ToolKind,
    /// Human-readable title.
    pub title: String,
    /// Current lifecycle status.
    pub status: ToolCallStatus,
    /// Touched file locations.
    pub locations: Vec<ToolCallLocation>,
    /// Opaque input as received; never introspected for control flow
    /// beyond classification.
    pub raw_input: Value,
}

/// Mutable per-session state, guarded by the session lock.
#[derive(Debug)]
pub struct Session {
    /// Unique, stable identifier.
    pub id: String,
    /// Absolute workspace root; used for path validation.
    pub cwd: PathBuf,
    /// Current permission mode.
    pub permission_mode: PermissionMode,
    /// Backend-supplied conversation id, once assigned.
    pub backend_handle: Option<String>,
    /// Latest plan snapshot sent to the host.
    pub current_plan: Vec<PlanEntry>,
    /// Live tool call records for the current turn.
    pub active_tool_calls: HashMap<String, ToolCallRecord>,
    /// Running context usage estimate.
    pub context_usage_tokens: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp.
    pub last_activity_at: DateTime<Utc>,
    /// Declared MCP servers, opaque passthrough to the backend.
    pub mcp_servers: Vec<Value>,
}

impl Session {
    /// Construct a session with a generated identifier.
    #[must_use]
    pub fn new(cwd: PathBuf, mcp_servers: Vec<Value>, permission_mode: PermissionMode) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), cwd, mcp_servers, permission_mode)
    }

    /// Construct a session bound to a host-supplied identifier.
    #[must_use]
    pub fn with_id(
        id: String,
        cwd: PathBuf,
        mcp_servers: Vec<Value>,
        permission_mode: PermissionMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            cwd,
            permission_mode,
            backend_handle: None,
            current_plan: Vec::new(),
            active_tool_calls: HashMap::new(),
            context_usage_tokens: 0,
            created_at: now,
            last_activity_at: now,
            mcp_servers,
        }
    }

    /// Stamp activity now.
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}

/// Shared session handle: the lock plus out-of-band turn state.
#[derive(Debug)]
pub struct SessionEntry {
    /// Session identifier (duplicated here so cancel paths avoid the lock).
    pub id: String,
    /// The session lock; a turn executor holds it for the whole turn.
    pub lock: tokio::sync::Mutex<Session>,
    turn: Mutex<Option<TurnHandle>>,
}

impl SessionEntry {
    /// Wrap a session into a shareable entry.
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self {
            id: session.id.clone(),
            lock: tokio::sync::Mutex::new(session),
            turn: Mutex::new(None),
        }
    }

    /// Install the handle for a starting turn, returning its cancel token.
    ///
    /// At most one handle exists per session; the caller must already hold
    /// the session lock, which serializes turns.
    pub fn begin_turn(&self) -> CancellationToken {
        let handle = TurnHandle::new();
        let token = handle.cancel.clone();
        *self.turn.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        token
    }

    /// Clear the turn handle once the turn's response is on the queue.
    pub fn end_turn(&self) {
        *self.turn.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Fire the in-flight turn's cancel token, if any. Idempotent.
    pub fn cancel_turn(&self) {
        let guard = self.turn.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = guard.as_ref() {
            handle.cancel.cancel();
        }
    }

    /// Count one consumed backend event on the in-flight turn.
    pub fn note_event(&self) {
        let mut guard = self.turn.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = guard.as_mut() {
            handle.event_count += 1;
        }
    }

    /// Whether a turn is currently in flight.
    #[must_use]
    pub fn turn_in_flight(&self) -> bool {
        self.turn
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}
