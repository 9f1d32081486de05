//! Subprocess backend adapter.
//!
//! Spawns the backend CLI in its long-running interactive mode with piped
//! stdio and `kill_on_drop`, strips the inherited environment down to a
//! safe allowlist, and speaks an NDJSON line protocol: one command object
//! per turn on stdin, a stream of `type`-tagged event objects on stdout
//! terminated by an `end` or `error` marker. Stderr is drained into
//! diagnostics. Unexpected exits and stream closures surface as adapter
//! errors, which the circuit breaker counts.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendAgent, BackendEvent, TurnRequest, TurnStream};
use crate::rpc::codec::JsonRpcCodec;
use crate::session::model::PermissionMode;
use crate::{AppError, Result};

/// Environment variables the backend process inherits.
///
/// Everything else is stripped with `env_clear()` so host credentials and
/// bridge configuration never leak into the child.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "TERM",
    "RUST_LOG",
    // Windows equivalents.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Maximum time the version probe waits for output.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period between the cancel sentinel and a hard kill.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// How many recent stderr lines are retained for diagnostics.
const STDERR_RETAIN: usize = 50;

// ── Wire events ───────────────────────────────────────────────────────────────

/// One `type`-tagged NDJSON event from the backend's stdout.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    /// Conversation id assignment.
    Session { id: String },
    /// Assistant output text.
    Text { text: String },
    /// Assistant reasoning text.
    Thought { text: String },
    /// Tool invocation.
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// Tool success.
    ToolResult {
        id: String,
        #[serde(default)]
        output: Value,
    },
    /// Tool failure.
    ToolError { id: String, message: String },
    /// Turn completed.
    End,
    /// Turn failed.
    Error { message: String },
}

impl WireEvent {
    /// Map a wire event to the adapter-neutral event type; `None` ends the
    /// stream.
    fn into_backend_event(self) -> BackendEvent {
        match self {
            Self::Session { id } => BackendEvent::SessionAssigned { id },
            Self::Text { text } => BackendEvent::AssistantText { text },
            Self::Thought { text } => BackendEvent::AssistantThought { text },
            Self::ToolUse { id, name, input } => BackendEvent::ToolUse { id, name, input },
            Self::ToolResult { id, output } => BackendEvent::ToolResult { id, output },
            Self::ToolError { id, message } => BackendEvent::ToolError { id, message },
            Self::End => BackendEvent::TurnEnd,
            Self::Error { message } => BackendEvent::TurnError { message },
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::Error { .. })
    }
}

// ── Child process state ───────────────────────────────────────────────────────

struct ChildIo {
    child: Child,
    stdin: ChildStdin,
    stdout: FramedRead<ChildStdout, JsonRpcCodec>,
}

/// Interactive subprocess adapter.
pub struct SubprocessAgent {
    program: Option<String>,
    io: Arc<tokio::sync::Mutex<Option<ChildIo>>>,
    recent_stderr: Arc<Mutex<VecDeque<String>>>,
}

impl SubprocessAgent {
    /// Create an adapter for the given executable path.
    #[must_use]
    pub fn new(program: Option<String>) -> Self {
        Self {
            program,
            io: Arc::new(tokio::sync::Mutex::new(None)),
            recent_stderr: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Recently captured stderr lines, newest last.
    #[must_use]
    pub fn recent_stderr(&self) -> Vec<String> {
        self.recent_stderr
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn program(&self) -> Result<&str> {
        self.program
            .as_deref()
            .ok_or_else(|| AppError::Backend("BACKEND_PATH is not configured".into()))
    }

    /// Spawn the interactive child if it is not already running.
    async fn ensure_spawned(&self, io: &mut Option<ChildIo>) -> Result<()> {
        if io.is_some() {
            return Ok(());
        }

        let program = self.program()?;
        let mut cmd = Command::new(program);
        cmd.arg("--interactive");

        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }

        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Backend(format!("failed to spawn backend: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Backend("failed to capture backend stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Backend("failed to capture backend stdout".into()))?;

        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_drain(stderr, Arc::clone(&self.recent_stderr));
        }

        info!(program, pid = child.id(), "backend subprocess spawned");

        *io = Some(ChildIo {
            child,
            stdin,
            stdout: FramedRead::new(stdout, JsonRpcCodec::new()),
        });
        Ok(())
    }
}

impl BackendAgent for SubprocessAgent {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    fn authenticate(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Credentials live with the backend CLI itself; a successful version
        // probe is the strongest check available from the outside.
        Box::pin(async move { self.version_inner().await.map(|_| ()) })
    }

    fn start_turn(
        &self,
        request: TurnRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TurnStream>> + Send + '_>> {
        Box::pin(async move {
            // Holding the io lock for the whole turn serializes backend
            // turns process-wide; the pump task carries the owned guard.
            let mut guard = Arc::clone(&self.io).lock_owned().await;
            self.ensure_spawned(&mut guard).await?;

            let command = turn_command(&request);
            {
                let Some(io) = guard.as_mut() else {
                    return Err(AppError::Backend("backend io unavailable".into()));
                };
                write_json_line(&mut io.stdin, &command)
                    .await
                    .map_err(|err| {
                        AppError::Backend(format!("failed to send turn command: {err}"))
                    })?;
            }

            let (event_tx, event_rx) = mpsc::channel(64);
            let abort = CancellationToken::new();
            tokio::spawn(pump_events(guard, event_tx, abort.clone()));

            Ok(TurnStream::new(event_rx, abort))
        })
    }

    fn version(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(self.version_inner())
    }
}

impl SubprocessAgent {
    async fn version_inner(&self) -> Result<String> {
        let program = self.program()?;
        let output = tokio::time::timeout(
            PROBE_TIMEOUT,
            Command::new(program)
                .arg("--version")
                .stdin(std::process::Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| AppError::Backend(format!("version probe timed out for '{program}'")))?
        .map_err(|err| AppError::Backend(format!("version probe failed for '{program}': {err}")))?;

        if !output.status.success() {
            return Err(AppError::Backend(format!(
                "version probe exited with {} for '{program}'",
                output.status
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_owned();
        if version.is_empty() {
            return Err(AppError::Backend(format!(
                "version probe produced no output for '{program}'"
            )));
        }
        Ok(version)
    }
}

// ── Turn plumbing ─────────────────────────────────────────────────────────────

/// Build the one-line turn command for the backend.
fn turn_command(request: &TurnRequest) -> Value {
    let mode = match request.permission_mode {
        PermissionMode::Default => "default",
        PermissionMode::AcceptEdits => "accept_edits",
        PermissionMode::BypassPermissions => "bypass_permissions",
        PermissionMode::Plan => "plan",
    };
    json!({
        "type": "turn",
        "prompt": request.prompt,
        "resume": request.resume,
        "max_turns": request.max_turns,
        "permission_mode": mode,
    })
}

/// Forward parsed backend events until a terminal marker, EOF, or abort.
///
/// Owns the adapter's io guard for the duration of the turn; the child is
/// taken out of the slot and only put back after a clean terminal marker,
/// so a broken stream forces a respawn on the next turn. On abort the
/// cancel sentinel is written and the child is given a grace period before
/// a hard kill.
async fn pump_events(
    mut guard: tokio::sync::OwnedMutexGuard<Option<ChildIo>>,
    event_tx: mpsc::Sender<BackendEvent>,
    abort: CancellationToken,
) {
    let Some(mut io) = guard.take() else {
        let _ = event_tx
            .send(BackendEvent::TurnError {
                message: "backend io unavailable".into(),
            })
            .await;
        return;
    };

    loop {
        tokio::select! {
            biased;

            () = abort.cancelled() => {
                debug!("backend pump: abort requested");
                abort_child(io).await;
                return;
            }

            item = io.stdout.next() => {
                match item {
                    None => {
                        // Backend closed its stdout; surface exit detail.
                        let detail = exit_detail(&mut io);
                        warn!(detail = %detail, "backend stream closed unexpectedly");
                        let _ = event_tx
                            .send(BackendEvent::TurnError {
                                message: format!("backend stream closed: {detail}"),
                            })
                            .await;
                        return;
                    }
                    Some(Err(err)) => {
                        warn!(%err, "backend pump: framing error, skipping line");
                    }
                    Some(Ok(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<WireEvent>(trimmed) {
                            Ok(event) => {
                                let terminal = event.is_terminal();
                                if event_tx.send(event.into_backend_event()).await.is_err() {
                                    debug!("backend pump: receiver dropped, stopping");
                                    return;
                                }
                                if terminal {
                                    // Clean turn end: keep the child for the
                                    // next turn.
                                    *guard = Some(io);
                                    return;
                                }
                            }
                            Err(err) => {
                                warn!(%err, raw = trimmed, "backend pump: unparseable event, skipping");
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Send the cancel sentinel, then kill after the grace period.
async fn abort_child(mut io: ChildIo) {
    let sentinel = json!({ "type": "cancel" });
    if let Err(err) = write_json_line(&mut io.stdin, &sentinel).await {
        debug!(%err, "backend abort: cancel sentinel write failed");
    }

    let wait_result = tokio::time::timeout(CANCEL_GRACE, io.child.wait()).await;
    match wait_result {
        Ok(Ok(status)) => {
            info!(?status, "backend exited after cancel");
        }
        Ok(Err(err)) => {
            warn!(%err, "backend abort: wait failed");
        }
        Err(_) => {
            warn!("backend did not exit within grace period, killing");
            if let Err(err) = io.child.kill().await {
                warn!(%err, "backend abort: kill failed");
            }
        }
    }
}

/// Describe how the child exited, if it did.
fn exit_detail(io: &mut ChildIo) -> String {
    match io.child.try_wait() {
        Ok(Some(status)) => status.code().map_or_else(
            || "terminated by signal".to_owned(),
            |code| format!("exited with code {code}"),
        ),
        Ok(None) => "stdout closed while process still running".into(),
        Err(err) => format!("wait error: {err}"),
    }
}

/// Drain the child's stderr into the diagnostics ring and the log.
fn spawn_stderr_drain(
    stderr: tokio::process::ChildStderr,
    retain: Arc<Mutex<VecDeque<String>>>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "backend_stderr", "{line}");
            let mut ring = retain.lock().unwrap_or_else(|e| e.into_inner());
            if ring.len() >= STDERR_RETAIN {
                ring.pop_front();
            }
            ring.push_back(line);
        }
    });
}

/// Serialise `value` as one `\n`-terminated line into the child's stdin.
async fn write_json_line(stdin: &mut ChildStdin, value: &Value) -> std::io::Result<()> {
    let mut bytes = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("json serialisation failed: {e}"),
        )
    })?;
    bytes.push(b'\n');
    stdin.write_all(&bytes).await?;
    stdin.flush().await
}
