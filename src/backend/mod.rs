//! Backend agent adapters.
//!
//! The [`BackendAgent`] trait is the narrow seam between the bridge and the
//! assistant that actually produces text and tool calls. Two adapters ship:
//! a long-running interactive subprocess speaking an NDJSON line protocol
//! ([`subprocess::SubprocessAgent`]) and a per-turn HTTP completion client
//! ([`http::HttpAgent`]). Both produce a finite event stream terminated by
//! `TurnEnd` or `TurnError`, with `ToolUse` always preceding its matching
//! result.

pub mod http;
pub mod subprocess;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{BackendMode, GlobalConfig};
use crate::session::model::PermissionMode;
use crate::Result;

/// One streamed event from the backend during a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Backend assigned (or confirmed) its conversation id.
    SessionAssigned {
        /// Opaque backend conversation id.
        id: String,
    },
    /// Assistant output text chunk.
    AssistantText {
        /// The text.
        text: String,
    },
    /// Assistant reasoning chunk.
    AssistantThought {
        /// The text.
        text: String,
    },
    /// The assistant invoked a tool.
    ToolUse {
        /// Tool call id.
        id: String,
        /// Tool name.
        name: String,
        /// Opaque input.
        input: Value,
    },
    /// A tool finished successfully.
    ToolResult {
        /// Tool call id.
        id: String,
        /// Opaque output.
        output: Value,
    },
    /// A tool failed.
    ToolError {
        /// Tool call id.
        id: String,
        /// Failure message.
        message: String,
    },
    /// The turn completed normally.
    TurnEnd,
    /// The turn failed.
    TurnError {
        /// Failure message.
        message: String,
    },
}

/// Parameters for starting one streamed turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Concatenated prompt text.
    pub prompt: String,
    /// Backend conversation id to resume, if any.
    pub resume: Option<String>,
    /// Turn cap; `None` means unlimited.
    pub max_turns: Option<u32>,
    /// Effective permission mode, forwarded for backends that honor it.
    pub permission_mode: PermissionMode,
}

/// Handle to an in-flight backend turn.
///
/// The receiver yields the event stream; [`TurnStream::abort`] asks the
/// adapter to stop producing (HTTP: drop the request; subprocess: send the
/// cancel sentinel). Abort is best-effort and never blocks.
#[derive(Debug)]
pub struct TurnStream {
    events: mpsc::Receiver<BackendEvent>,
    abort: CancellationToken,
}

impl TurnStream {
    /// Pair a fresh stream with its abort token.
    #[must_use]
    pub fn new(events: mpsc::Receiver<BackendEvent>, abort: CancellationToken) -> Self {
        Self { events, abort }
    }

    /// Receive the next event; `None` once the stream is exhausted.
    pub async fn next(&mut self) -> Option<BackendEvent> {
        self.events.recv().await
    }

    /// Ask the adapter to abort the turn.
    pub fn abort(&self) {
        self.abort.cancel();
    }
}

/// Narrow interface over a backend assistant.
pub trait BackendAgent: Send + Sync {
    /// Adapter name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Verify credentials or binary availability.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Auth`] or [`crate::AppError::Backend`]
    /// when the backend cannot be used.
    fn authenticate(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Start a streaming turn.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Backend`] when the turn cannot start; the
    /// circuit breaker counts these.
    fn start_turn(
        &self,
        request: TurnRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TurnStream>> + Send + '_>>;

    /// Report the backend version (startup probe).
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Backend`] when the probe fails.
    fn version(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;
}

/// Outcome of adapter selection at startup.
pub struct SelectedBackend {
    /// The adapter the bridge will use.
    pub agent: Arc<dyn BackendAgent>,
    /// Probe report for the chosen adapter.
    pub version: Option<String>,
    /// Why the preferred adapter was not chosen, if a fallback happened.
    pub fallback_reason: Option<String>,
}

/// Probe the preferred adapter and fall back to the other on failure.
///
/// Selection never fails the process: if both probes fail the preferred
/// adapter is kept and every recorded reason is surfaced through
/// diagnostics (turn-time failures then flow through the circuit breaker).
pub async fn select_backend(config: &GlobalConfig) -> SelectedBackend {
    let subprocess: Arc<dyn BackendAgent> =
        Arc::new(subprocess::SubprocessAgent::new(config.backend_path.clone()));
    let http: Arc<dyn BackendAgent> = Arc::new(http::HttpAgent::new(config.http.clone()));

    let (preferred, secondary) = match config.backend_mode {
        BackendMode::Subprocess => (subprocess, http),
        BackendMode::Http => (http, subprocess),
    };

    match preferred.version().await {
        Ok(version) => {
            info!(adapter = preferred.name(), %version, "backend adapter selected");
            SelectedBackend {
                agent: preferred,
                version: Some(version),
                fallback_reason: None,
            }
        }
        Err(primary_err) => {
            warn!(
                adapter = preferred.name(),
                error = %primary_err,
                "preferred backend probe failed, trying fallback"
            );
            match secondary.version().await {
                Ok(version) => {
                    info!(adapter = secondary.name(), %version, "fallback backend selected");
                    SelectedBackend {
                        agent: secondary,
                        version: Some(version),
                        fallback_reason: Some(format!(
                            "{} probe failed: {primary_err}",
                            preferred.name()
                        )),
                    }
                }
                Err(secondary_err) => {
                    warn!(
                        adapter = secondary.name(),
                        error = %secondary_err,
                        "fallback backend probe failed too, keeping preferred"
                    );
                    SelectedBackend {
                        agent: preferred,
                        version: None,
                        fallback_reason: Some(format!(
                            "both probes failed: {primary_err}; {secondary_err}"
                        )),
                    }
                }
            }
        }
    }
}
