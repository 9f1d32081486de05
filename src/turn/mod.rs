//! Turn executor — the central state machine.
//!
//! Runs a single prompt turn while holding the session lock: pre-flight
//! (inline permission markers, context advisory, resource admission,
//! breaker-wrapped backend start), then the event loop translating backend
//! events into ordered `session/update` notifications, and finally the
//! stop reason. Cancellation is cooperative at every yield point.

pub mod plan;
pub mod tools;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendAgent, BackendEvent, TurnRequest, TurnStream};
use crate::guard::{CircuitBreaker, ContextMonitor, ContextSeverity, ResourceGuard};
use crate::permission::{PermissionBroker, PermissionDecision};
use crate::protocol::{
    ContentBlock, PermissionToolCall, SessionNotification, SessionUpdate, StopReason,
    ToolCallStatus,
};
use crate::rpc::RpcEndpoint;
use crate::session::model::{PermissionMode, Session, SessionEntry, ToolCallRecord};
use crate::{AppError, Result};

/// Delay between a tool call's `pending` announcement and its promotion to
/// `in_progress`.
const PROMOTE_DELAY: Duration = Duration::from_millis(100);

/// Trailing debounce for plan updates.
const PLAN_DEBOUNCE: Duration = Duration::from_millis(500);

/// Inline markers that switch the session's permission mode mid-stream.
const MARKERS: &[(&str, PermissionMode)] = &[
    ("[ACP:PERMISSION:ACCEPT_EDITS]", PermissionMode::AcceptEdits),
    ("[ACP:PERMISSION:BYPASS]", PermissionMode::BypassPermissions),
    ("[ACP:PERMISSION:DEFAULT]", PermissionMode::Default),
];

/// Shared services the executor needs for every turn.
pub struct TurnServices {
    /// Host-facing endpoint for updates and permission requests.
    pub endpoint: Arc<RpcEndpoint>,
    /// Permission broker.
    pub broker: PermissionBroker,
    /// Circuit breaker wrapping backend calls.
    pub breaker: Arc<CircuitBreaker>,
    /// Global admission control.
    pub guard: Arc<ResourceGuard>,
    /// Context usage monitor.
    pub monitor: Arc<ContextMonitor>,
    /// The backend adapter.
    pub backend: Arc<dyn BackendAgent>,
    /// Configured turn cap; `0` means unlimited.
    pub max_turns: u32,
}

/// Releases an operation slot when the turn ends, on every path.
struct OpSlot {
    guard: Arc<ResourceGuard>,
    id: String,
}

impl Drop for OpSlot {
    fn drop(&mut self) {
        self.guard.finish_operation(&self.id);
    }
}

/// Scan for the first inline permission marker in the prompt.
#[must_use]
pub fn scan_permission_marker(prompt: &str) -> Option<PermissionMode> {
    MARKERS
        .iter()
        .filter_map(|(marker, mode)| prompt.find(marker).map(|pos| (pos, *mode)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, mode)| mode)
}

/// Concatenate the text blocks of a prompt into one string.
#[must_use]
pub fn prompt_text(blocks: &[ContentBlock]) -> String {
    let mut text = String::new();
    for block in blocks {
        if let ContentBlock::Text { text: chunk } = block {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(chunk);
        }
    }
    text
}

/// Run one prompt turn. The caller holds the session lock and has
/// installed the turn handle whose token is `cancel`.
///
/// # Errors
///
/// Scaffolding failures (admission denial, backend start failure other
/// than an open circuit) surface as method errors; everything inside the
/// stream is reported in-band and ends with `Ok(EndTurn)`.
pub async fn run_turn(
    services: &TurnServices,
    entry: &SessionEntry,
    state: &mut Session,
    blocks: &[ContentBlock],
    cancel: &CancellationToken,
) -> Result<StopReason> {
    let session_id = state.id.clone();
    let text = prompt_text(blocks);

    // ── Pre-flight 1: inline permission markers ──────────────
    if let Some(mode) = scan_permission_marker(&text) {
        info!(session_id, ?mode, "permission mode switched by inline marker");
        state.permission_mode = mode;
    }

    // ── Pre-flight 2: context usage advisory ─────────────────
    if let Some(severity) = services.monitor.record_message(&session_id, &text) {
        let advisory = context_advisory(services, &session_id, severity);
        notify(services, &session_id, SessionUpdate::AgentMessageChunk {
            content: ContentBlock::text(advisory),
        })
        .await?;
    }
    services.monitor.record_turn(&session_id);
    state.context_usage_tokens = services.monitor.estimated_tokens(&session_id);

    // ── Pre-flight 3: operation admission ────────────────────
    services.guard.start_operation(&session_id)?;
    let _slot = OpSlot {
        guard: Arc::clone(&services.guard),
        id: session_id.clone(),
    };

    // ── Pre-flight 4: start the backend stream ───────────────
    let request = TurnRequest {
        prompt: text.clone(),
        resume: state.backend_handle.clone(),
        max_turns: (services.max_turns > 0).then_some(services.max_turns),
        permission_mode: state.permission_mode,
    };
    let backend = Arc::clone(&services.backend);
    let stream = match services
        .breaker
        .call(move || async move { backend.start_turn(request).await })
        .await
    {
        Ok(stream) => stream,
        Err(AppError::CircuitOpen) => {
            warn!(session_id, "circuit open, declining turn");
            notify(services, &session_id, SessionUpdate::AgentMessageChunk {
                content: ContentBlock::text(
                    "The backend agent is temporarily unavailable. Please try again shortly.",
                ),
            })
            .await?;
            return Ok(StopReason::EndTurn);
        }
        Err(err) => return Err(err),
    };

    // ── Synthetic plan for complex prompts ───────────────────
    if let Some(entries) = plan::synthesize(&text) {
        state.current_plan = entries.clone();
        notify(services, &session_id, SessionUpdate::Plan { entries }).await?;
    }

    let outcome = event_loop(services, entry, state, stream, cancel).await;
    state.touch();
    outcome
}

/// Consume backend events until the stream ends or cancellation fires.
async fn event_loop(
    services: &TurnServices,
    entry: &SessionEntry,
    state: &mut Session,
    mut stream: TurnStream,
    cancel: &CancellationToken,
) -> Result<StopReason> {
    let session_id = state.id.clone();

    // Tool calls awaiting their pending → in_progress promotion.
    let mut promotions: VecDeque<(Instant, String)> = VecDeque::new();
    // Trailing-debounce deadline for the next plan update.
    let mut plan_deadline: Option<Instant> = None;

    loop {
        let wake = promotions
            .front()
            .map(|(at, _)| *at)
            .into_iter()
            .chain(plan_deadline)
            .min()
            .unwrap_or_else(far_future);

        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                info!(session_id, "turn cancelled");
                stream.abort();
                flush_cancelled_tool_calls(services, state).await;
                return Ok(StopReason::Cancelled);
            }

            () = tokio::time::sleep_until(wake) => {
                promote_due(services, state, &mut promotions).await?;
                if plan_deadline.is_some_and(|at| Instant::now() >= at) {
                    plan_deadline = None;
                    notify(services, &session_id, SessionUpdate::Plan {
                        entries: state.current_plan.clone(),
                    })
                    .await?;
                }
            }

            event = stream.next() => {
                entry.note_event();
                let Some(event) = event else {
                    // Adapter contract violation: stream ended without a marker.
                    warn!(session_id, "backend stream ended without turn marker");
                    notify(services, &session_id, SessionUpdate::AgentMessageChunk {
                        content: ContentBlock::text("Backend stream ended unexpectedly."),
                    })
                    .await?;
                    break;
                };

                match event {
                    BackendEvent::SessionAssigned { id } => {
                        debug!(session_id, backend_handle = %id, "backend conversation assigned");
                        state.backend_handle = Some(id);
                    }

                    BackendEvent::AssistantText { text } => {
                        services.monitor.record_message(&session_id, &text);
                        state.context_usage_tokens =
                            services.monitor.estimated_tokens(&session_id);
                        notify(services, &session_id, SessionUpdate::AgentMessageChunk {
                            content: ContentBlock::text(text),
                        })
                        .await?;
                    }

                    BackendEvent::AssistantThought { text } => {
                        notify(services, &session_id, SessionUpdate::AgentThoughtChunk {
                            content: ContentBlock::text(text),
                        })
                        .await?;
                    }

                    BackendEvent::ToolUse { id, name, input } => {
                        handle_tool_use(
                            services,
                            state,
                            &mut promotions,
                            cancel,
                            id,
                            &name,
                            input,
                        )
                        .await?;
                    }

                    BackendEvent::ToolResult { id, output } => {
                        if finish_tool_call(services, state, &id, ToolCallStatus::Completed, |record| {
                            tools::result_content(&record.raw_input, &output)
                        })
                        .await?
                            && plan::advance(&mut state.current_plan)
                        {
                            plan_deadline = Some(Instant::now() + PLAN_DEBOUNCE);
                        }
                    }

                    BackendEvent::ToolError { id, message } => {
                        finish_tool_call(services, state, &id, ToolCallStatus::Failed, |_| {
                            vec![ContentBlock::text(message.clone())]
                        })
                        .await?;
                    }

                    BackendEvent::TurnEnd => {
                        debug!(session_id, "backend turn ended");
                        break;
                    }

                    BackendEvent::TurnError { message } => {
                        warn!(session_id, error = %message, "backend turn error");
                        notify(services, &session_id, SessionUpdate::AgentMessageChunk {
                            content: ContentBlock::text(format!("Backend error: {message}")),
                        })
                        .await?;
                        break;
                    }
                }
            }
        }
    }

    // The stream is done; every surviving record still needs its terminal
    // update before the turn's response goes out.
    flush_incomplete_tool_calls(services, state).await?;

    if plan_deadline.is_some() {
        notify(services, &session_id, SessionUpdate::Plan {
            entries: state.current_plan.clone(),
        })
        .await?;
    }

    Ok(StopReason::EndTurn)
}

/// Handle a `ToolUse` event: record, announce, authorize, schedule.
async fn handle_tool_use(
    services: &TurnServices,
    state: &mut Session,
    promotions: &mut VecDeque<(Instant, String)>,
    cancel: &CancellationToken,
    id: String,
    name: &str,
    input: Value,
) -> Result<()> {
    let session_id = state.id.clone();
    let op = tools::build_operation(name, &input);
    let kind = op.op_type;
    let title = tools::derive_title(name, kind, &input);
    let locations = tools::extract_locations(&input);

    let record = ToolCallRecord {
        id: id.clone(),
        kind,
        title: title.clone(),
        status: ToolCallStatus::Pending,
        locations: locations.clone(),
        raw_input: input.clone(),
    };
    state.active_tool_calls.insert(id.clone(), record);

    notify(services, &session_id, SessionUpdate::ToolCall {
        id: id.clone(),
        title: title.clone(),
        kind,
        status: ToolCallStatus::Pending,
        raw_input: Some(input.clone()),
        locations,
    })
    .await?;

    let summary = PermissionToolCall {
        tool_call_id: id.clone(),
        title,
        kind,
        raw_input: Some(input),
    };
    let decision = services
        .broker
        .authorize(
            &session_id,
            &state.cwd,
            state.permission_mode,
            &op,
            summary,
            cancel,
        )
        .await;

    match decision {
        PermissionDecision::Allow => {
            promotions.push_back((Instant::now() + PROMOTE_DELAY, id));
        }
        PermissionDecision::Deny => {
            info!(session_id, tool_call = %id, "tool call denied");
            finish_tool_call(services, state, &id, ToolCallStatus::Failed, |_| {
                vec![ContentBlock::text("Permission denied by the user.")]
            })
            .await?;
        }
    }
    Ok(())
}

/// Promote due pending tool calls to `in_progress`.
async fn promote_due(
    services: &TurnServices,
    state: &mut Session,
    promotions: &mut VecDeque<(Instant, String)>,
) -> Result<()> {
    let now = Instant::now();
    while promotions.front().is_some_and(|(at, _)| *at <= now) {
        let Some((_, id)) = promotions.pop_front() else {
            break;
        };
        let Some(record) = state.active_tool_calls.get_mut(&id) else {
            continue;
        };
        if record.status != ToolCallStatus::Pending {
            continue;
        }
        record.status = ToolCallStatus::InProgress;
        let session_id = state.id.clone();
        notify(services, &session_id, SessionUpdate::ToolCallUpdate {
            id,
            status: ToolCallStatus::InProgress,
            content: Vec::new(),
        })
        .await?;
    }
    Ok(())
}

/// Emit the terminal update for a tool call and drop its record.
///
/// Returns whether a record was actually finished (guards against
/// duplicate terminal updates for the same id).
async fn finish_tool_call<F>(
    services: &TurnServices,
    state: &mut Session,
    id: &str,
    status: ToolCallStatus,
    content: F,
) -> Result<bool>
where
    F: FnOnce(&ToolCallRecord) -> Vec<ContentBlock>,
{
    let Some(record) = state.active_tool_calls.remove(id) else {
        debug!(tool_call = id, "result for unknown tool call, ignoring");
        return Ok(false);
    };
    if record.status.is_terminal() {
        return Ok(false);
    }

    let blocks = content(&record);
    let session_id = state.id.clone();
    notify(services, &session_id, SessionUpdate::ToolCallUpdate {
        id: id.to_owned(),
        status,
        content: blocks,
    })
    .await?;
    Ok(true)
}

/// On cancellation: fail every live record with a synthetic message.
///
/// Send failures are ignored here — the host may already be gone, and the
/// cancel response must not be delayed.
async fn flush_cancelled_tool_calls(services: &TurnServices, state: &mut Session) {
    let ids: Vec<String> = state.active_tool_calls.keys().cloned().collect();
    for id in ids {
        let _ = finish_tool_call(services, state, &id, ToolCallStatus::Failed, |_| {
            vec![ContentBlock::text("Tool call cancelled.")]
        })
        .await;
    }
}

/// After a normal stream end: fail records the backend never resolved.
async fn flush_incomplete_tool_calls(services: &TurnServices, state: &mut Session) -> Result<()> {
    let ids: Vec<String> = state.active_tool_calls.keys().cloned().collect();
    for id in ids {
        finish_tool_call(services, state, &id, ToolCallStatus::Failed, |_| {
            vec![ContentBlock::text("Tool call did not complete.")]
        })
        .await?;
    }
    Ok(())
}

/// Send one `session/update` notification.
async fn notify(services: &TurnServices, session_id: &str, update: SessionUpdate) -> Result<()> {
    let notification = SessionNotification {
        session_id: session_id.to_owned(),
        update,
    };
    services
        .endpoint
        .send_notification("session/update", serde_json::to_value(&notification)?)
        .await
}

/// Advisory text for a context usage threshold crossing.
fn context_advisory(services: &TurnServices, session_id: &str, severity: ContextSeverity) -> String {
    let tokens = services.monitor.estimated_tokens(session_id);
    let percent = (crate::guard::context::usage_ratio(tokens) * 100.0).round() as u32;
    match severity {
        ContextSeverity::Warning => format!(
            "Note: this conversation has used about {percent}% of the available \
             context window. Consider starting a fresh session soon."
        ),
        ContextSeverity::Critical => format!(
            "Warning: this conversation has used about {percent}% of the available \
             context window. Responses may degrade; start a fresh session."
        ),
    }
}

/// A wake deadline far enough away to mean "no timer pending".
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400)
}
