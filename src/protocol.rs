//! ACP wire types.
//!
//! Serde models for the methods the bridge implements (`initialize`,
//! `session/new`, `session/load`, `authenticate`, `session/prompt`,
//! `session/cancel`) and the notifications and requests it sends host-ward
//! (`session/update`, `session/request_permission`).
//!
//! Wire keys are camelCase; enum discriminants are snake_case strings, both
//! matching the protocol as editors speak it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Content model ─────────────────────────────────────────────────────────────

/// A single content block inside a prompt or a session update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain UTF-8 text.
    Text {
        /// The text payload.
        text: String,
    },
    /// Inline image content.
    Image {
        /// Base64-encoded payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        /// MIME type of the payload.
        #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// Structured file change; the host renders the diff.
    Diff {
        /// Workspace path the change applies to.
        path: String,
        /// Previous content, absent for file creation.
        #[serde(default, rename = "oldText", skip_serializing_if = "Option::is_none")]
        old_text: Option<String>,
        /// New content.
        #[serde(rename = "newText")]
        new_text: String,
    },
    /// Link to a resource the host may fetch.
    ResourceLink {
        /// Resource URI.
        uri: String,
        /// Display name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Embedded context supplied by the host with the prompt.
    Resource {
        /// Opaque resource payload.
        resource: Value,
    },
}

impl ContentBlock {
    /// Convenience constructor for a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

// ── Tool calls ────────────────────────────────────────────────────────────────

/// Categorization of a tool call, advisory to the host's rendering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Reads file content.
    Read,
    /// Modifies or creates files.
    Edit,
    /// Deletes files.
    Delete,
    /// Moves or renames files.
    Move,
    /// Searches code or files.
    Search,
    /// Runs a command.
    Execute,
    /// Internal reasoning step.
    Think,
    /// Retrieves remote content.
    Fetch,
    /// Anything else.
    Other,
}

/// Lifecycle status of a tool call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Announced, awaiting permission or start.
    Pending,
    /// Running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error or was denied.
    Failed,
}

impl ToolCallStatus {
    /// Whether this status ends the tool call lifecycle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A file location a tool call touches, used by hosts to follow along.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallLocation {
    /// Absolute or workspace-relative path.
    pub path: String,
    /// Optional line number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

// ── Plans ─────────────────────────────────────────────────────────────────────

/// Priority of a plan entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanEntryPriority {
    /// Must happen for the turn to succeed.
    High,
    /// Ordinary step.
    Medium,
    /// Nice to have.
    Low,
}

/// Status of a plan entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanEntryStatus {
    /// Not started.
    Pending,
    /// Currently being worked.
    InProgress,
    /// Done.
    Completed,
    /// Abandoned.
    Failed,
}

/// One entry of an execution plan; ordering is list position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    /// Human-readable step description.
    pub content: String,
    /// Entry priority.
    pub priority: PlanEntryPriority,
    /// Entry status.
    pub status: PlanEntryStatus,
}

// ── Session updates ───────────────────────────────────────────────────────────

/// Payload of a `session/update` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// Streamed assistant output text.
    AgentMessageChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// Streamed assistant reasoning text.
    AgentThoughtChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// Echo of user input (used when the backend restates the prompt).
    UserMessageChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// A new tool call was announced.
    #[serde(rename_all = "camelCase")]
    ToolCall {
        /// Tool call identifier.
        id: String,
        /// Human-readable title.
        title: String,
        /// Tool categorization.
        kind: ToolKind,
        /// Initial status.
        status: ToolCallStatus,
        /// Opaque tool input as received from the backend.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_input: Option<Value>,
        /// Touched file locations.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        locations: Vec<ToolCallLocation>,
    },
    /// A tool call changed status or produced content.
    #[serde(rename_all = "camelCase")]
    ToolCallUpdate {
        /// Tool call identifier.
        id: String,
        /// New status.
        status: ToolCallStatus,
        /// Result or error content.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        content: Vec<ContentBlock>,
    },
    /// Latest execution plan snapshot.
    Plan {
        /// Ordered plan entries.
        entries: Vec<PlanEntry>,
    },
}

/// Params of the `session/update` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Session the update belongs to.
    pub session_id: String,
    /// The update payload.
    pub update: SessionUpdate,
}

// ── Permission requests ───────────────────────────────────────────────────────

/// Kind of a permission option presented to the host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    /// Allow this call only.
    AllowOnce,
    /// Allow this and future matching calls.
    AllowAlways,
    /// Reject this call only.
    RejectOnce,
    /// Reject this and future matching calls.
    RejectAlways,
}

/// One selectable option in a `session/request_permission` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Stable identifier echoed back by the host.
    pub option_id: String,
    /// Display label.
    pub name: String,
    /// Option kind.
    pub kind: PermissionOptionKind,
}

impl PermissionOption {
    /// Build the canonical option for a kind (id equals the kind string).
    #[must_use]
    pub fn of_kind(kind: PermissionOptionKind, name: &str) -> Self {
        let option_id = match kind {
            PermissionOptionKind::AllowOnce => "allow_once",
            PermissionOptionKind::AllowAlways => "allow_always",
            PermissionOptionKind::RejectOnce => "reject_once",
            PermissionOptionKind::RejectAlways => "reject_always",
        };
        Self {
            option_id: option_id.into(),
            name: name.into(),
            kind,
        }
    }
}

/// Summary of the tool call a permission request concerns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionToolCall {
    /// Tool call identifier.
    pub tool_call_id: String,
    /// Human-readable title.
    pub title: String,
    /// Tool categorization.
    pub kind: ToolKind,
    /// Opaque tool input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
}

/// Params of the outbound `session/request_permission` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionParams {
    /// Session the request belongs to.
    pub session_id: String,
    /// The tool call awaiting permission.
    pub tool_call: PermissionToolCall,
    /// Options the host may select.
    pub options: Vec<PermissionOption>,
}

/// Host's answer to a permission request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionOutcome {
    /// The host picked an option.
    #[serde(rename_all = "camelCase")]
    Selected {
        /// Identifier of the chosen option.
        option_id: String,
    },
    /// The host dismissed the request (treated as deny).
    Cancelled,
}

/// Result wrapper of `session/request_permission`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestPermissionResult {
    /// The outcome object.
    pub outcome: PermissionOutcome,
}

// ── Method params / results ───────────────────────────────────────────────────

/// Params of `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version the host speaks.
    pub protocol_version: String,
    /// Host capability declaration, kept opaque.
    #[serde(default)]
    pub client_capabilities: Value,
}

/// Prompt-related capabilities advertised by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PromptCapabilities {
    /// Image blocks accepted in prompts.
    pub image: bool,
    /// Audio blocks accepted in prompts.
    pub audio: bool,
    /// Embedded context blocks accepted in prompts.
    pub embedded_context: bool,
}

/// Capability block of the `initialize` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    /// Whether `session/load` is supported.
    pub load_session: bool,
    /// Prompt content capabilities.
    pub prompt_capabilities: PromptCapabilities,
}

/// One advertised authentication method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthMethod {
    /// Method identifier passed to `authenticate`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

/// Result of `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the bridge speaks back.
    pub protocol_version: String,
    /// Bridge capabilities.
    pub agent_capabilities: AgentCapabilities,
    /// Supported authentication methods.
    pub auth_methods: Vec<AuthMethod>,
}

/// Params of `session/new`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionParams {
    /// Absolute workspace root.
    pub cwd: String,
    /// Declared MCP servers, passed through to the backend untouched.
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// Result of `session/new`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResult {
    /// Fresh session identifier.
    pub session_id: String,
}

/// Params of `session/load`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionParams {
    /// Session identifier to adopt.
    pub session_id: String,
    /// Absolute workspace root.
    pub cwd: String,
    /// Declared MCP servers.
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// Params of `authenticate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateParams {
    /// One of the advertised method ids.
    pub method_id: String,
}

/// Params of `session/prompt`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptParams {
    /// Target session.
    pub session_id: String,
    /// Ordered prompt content blocks.
    pub prompt: Vec<ContentBlock>,
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Stream completed normally, or an error was surfaced in-band.
    EndTurn,
    /// The session's cancel token fired.
    Cancelled,
    /// Backend reported output token exhaustion.
    MaxTokens,
    /// Backend reported the turn cap.
    MaxTurns,
    /// Backend refused the request.
    Refusal,
}

/// Result of `session/prompt`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    /// Why the turn ended.
    pub stop_reason: StopReason,
}

/// Params of the `session/cancel` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CancelParams {
    /// Target session.
    pub session_id: String,
}

/// Protocol version the bridge implements.
pub const PROTOCOL_VERSION: &str = "0.1.0";
