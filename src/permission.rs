//! Permission broker: tool-operation classification and host confirmation.
//!
//! Rules run in order: mode short-circuit, then the requires-confirmation
//! test (deletions, dangerous commands, paths escaping the workspace).
//! Operations that need confirmation become a `session/request_permission`
//! round-trip; the host's answer is interpreted strictly — only an
//! `allow_once` / `allow_always` selection allows the call, and a cancelled
//! prompt is a deny, not an error.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::protocol::{
    PermissionOption, PermissionOptionKind, PermissionOutcome, PermissionToolCall,
    RequestPermissionParams, RequestPermissionResult, ToolKind,
};
use crate::rpc::RpcEndpoint;
use crate::session::model::PermissionMode;

/// Command names that always require confirmation when executed.
pub const DANGEROUS_COMMANDS: &[&str] = &["rm", "sudo", "chmod", "chown", "mv", "cp", "dd"];

/// A classified tool operation awaiting a permission decision.
#[derive(Debug, Clone)]
pub struct ToolOperation {
    /// Backend-reported tool name.
    pub tool_name: String,
    /// Opaque tool input.
    pub inputs: Value,
    /// Paths the operation touches, as extracted from the input.
    pub affected_paths: Vec<PathBuf>,
    /// Operation category (same table as the host-visible tool kind).
    pub op_type: ToolKind,
    /// Human-readable reasons the operation is considered dangerous.
    pub danger_flags: Vec<String>,
}

/// Broker decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    /// The tool call may proceed.
    Allow,
    /// The tool call must not proceed; the turn continues.
    Deny,
}

/// Classifies operations and brokers host confirmation.
pub struct PermissionBroker {
    endpoint: Arc<RpcEndpoint>,
}

impl PermissionBroker {
    /// Create a broker issuing requests through `endpoint`.
    #[must_use]
    pub fn new(endpoint: Arc<RpcEndpoint>) -> Self {
        Self { endpoint }
    }

    /// Decide whether `op` may proceed, asking the host when required.
    ///
    /// Cancellation of the parent turn (via `cancel`) resolves a pending
    /// prompt as deny. At most one prompt is outstanding per turn because
    /// the executor awaits this call inline.
    pub async fn authorize(
        &self,
        session_id: &str,
        cwd: &Path,
        mode: PermissionMode,
        op: &ToolOperation,
        tool_call: PermissionToolCall,
        cancel: &CancellationToken,
    ) -> PermissionDecision {
        // ── 1. Mode short-circuit ────────────────────────────
        if mode == PermissionMode::BypassPermissions {
            debug!(session_id, tool = %op.tool_name, "permission: bypass mode, allowing");
            return PermissionDecision::Allow;
        }
        if mode == PermissionMode::AcceptEdits
            && matches!(op.op_type, ToolKind::Read | ToolKind::Search)
        {
            debug!(session_id, tool = %op.tool_name, "permission: accept_edits read, allowing");
            return PermissionDecision::Allow;
        }

        // ── 2. Auto-deny of never-safe ops: currently none ───

        // ── 3. Requires-confirmation test ────────────────────
        if !requires_confirmation(op, cwd) {
            return PermissionDecision::Allow;
        }

        // ── 4. Host confirmation round-trip ──────────────────
        let options = options_for(op.op_type);
        let params = RequestPermissionParams {
            session_id: session_id.to_owned(),
            tool_call,
            options: options.clone(),
        };
        let params_value = match serde_json::to_value(&params) {
            Ok(value) => value,
            Err(err) => {
                debug!(session_id, %err, "permission: params serialisation failed, denying");
                return PermissionDecision::Deny;
            }
        };

        info!(session_id, tool = %op.tool_name, "requesting permission from host");

        let outcome = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "permission: turn cancelled while pending, denying");
                return PermissionDecision::Deny;
            }

            result = self.endpoint.send_request("session/request_permission", params_value) => {
                match result {
                    Ok(value) => value,
                    Err(err) => {
                        debug!(session_id, %err, "permission: request failed, denying");
                        return PermissionDecision::Deny;
                    }
                }
            }
        };

        // ── 5. Interpret the outcome ─────────────────────────
        interpret_outcome(&outcome, &options)
    }
}

/// The requires-confirmation test of the classification rules.
#[must_use]
pub fn requires_confirmation(op: &ToolOperation, cwd: &Path) -> bool {
    if op.op_type == ToolKind::Delete {
        return true;
    }

    if op.op_type == ToolKind::Execute {
        if let Some(command) = op.inputs.get("command").and_then(Value::as_str) {
            if command_is_dangerous(command) {
                return true;
            }
        }
    }

    op.affected_paths
        .iter()
        .any(|path| path.is_absolute() && !lexically_contained(cwd, path))
}

/// Whether any token of the command string matches the danger list.
#[must_use]
pub fn command_is_dangerous(command: &str) -> bool {
    command.split_whitespace().any(|token| {
        let name = token.rsplit('/').next().unwrap_or(token);
        DANGEROUS_COMMANDS.contains(&name)
    })
}

/// Lexical containment of `candidate` within `root`.
///
/// Normalizes `..` and `.` segments without touching the filesystem; a pop
/// past the start counts as an escape.
#[must_use]
pub fn lexically_contained(root: &Path, candidate: &Path) -> bool {
    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return false;
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    normalized.starts_with(root)
}

/// Permission options offered for an operation category.
///
/// `allow_always` is withheld for deletions.
#[must_use]
pub fn options_for(op_type: ToolKind) -> Vec<PermissionOption> {
    let mut options = vec![PermissionOption::of_kind(
        PermissionOptionKind::AllowOnce,
        "Allow once",
    )];
    if op_type != ToolKind::Delete {
        options.push(PermissionOption::of_kind(
            PermissionOptionKind::AllowAlways,
            "Always allow",
        ));
    }
    options.push(PermissionOption::of_kind(
        PermissionOptionKind::RejectOnce,
        "Reject once",
    ));
    options.push(PermissionOption::of_kind(
        PermissionOptionKind::RejectAlways,
        "Always reject",
    ));
    options
}

/// Map the host's outcome value onto a decision.
fn interpret_outcome(outcome: &Value, options: &[PermissionOption]) -> PermissionDecision {
    let parsed: RequestPermissionResult = match serde_json::from_value(outcome.clone()) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(%err, "permission: malformed outcome, denying");
            return PermissionDecision::Deny;
        }
    };

    match parsed.outcome {
        PermissionOutcome::Cancelled => PermissionDecision::Deny,
        PermissionOutcome::Selected { option_id } => {
            let kind = options
                .iter()
                .find(|option| option.option_id == option_id)
                .map(|option| option.kind);
            match kind {
                Some(PermissionOptionKind::AllowOnce | PermissionOptionKind::AllowAlways) => {
                    PermissionDecision::Allow
                }
                _ => PermissionDecision::Deny,
            }
        }
    }
}
