//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

// ── JSON-RPC error codes ──────────────────────────────────────────────────────

/// Parse error: invalid JSON was received.
pub const CODE_PARSE_ERROR: i64 = -32700;
/// Invalid request: the frame is not a valid JSON-RPC message.
pub const CODE_INVALID_REQUEST: i64 = -32600;
/// Method not found.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
/// Invalid params: the params failed schema validation.
pub const CODE_INVALID_PARAMS: i64 = -32602;
/// Internal error.
pub const CODE_INTERNAL_ERROR: i64 = -32603;
/// Authentication required before the method can be used.
pub const CODE_AUTH_REQUIRED: i64 = -32000;
/// The referenced session does not exist.
pub const CODE_SESSION_NOT_FOUND: i64 = -32001;
/// The session already has a turn in flight.
pub const CODE_SESSION_BUSY: i64 = -32002;
/// Admission denied: connection destroyed, memory pressure, or slot limits.
pub const CODE_RESOURCE_EXHAUSTED: i64 = -32003;

/// Application error enumeration covering all bridge failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Malformed params or invalid configuration value.
    Validation(String),
    /// Requested session does not exist.
    SessionNotFound(String),
    /// Session already has a turn in flight.
    SessionBusy(String),
    /// Admission denied by the resource guard.
    Resource(String),
    /// Frame decode failure or protocol invariant violation.
    Protocol(String),
    /// Requested method is not implemented.
    MethodNotFound(String),
    /// Authentication required or rejected.
    Auth(String),
    /// Backend agent adapter failure (counted by the circuit breaker).
    Backend(String),
    /// Circuit breaker is open; the backend is shedding load.
    CircuitOpen,
    /// Startup configuration failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Anything unexpected.
    Internal(String),
}

impl AppError {
    /// JSON-RPC error code for this error kind.
    #[must_use]
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            Self::Validation(_) => CODE_INVALID_PARAMS,
            Self::SessionNotFound(_) => CODE_SESSION_NOT_FOUND,
            Self::SessionBusy(_) => CODE_SESSION_BUSY,
            Self::Resource(_) | Self::CircuitOpen => CODE_RESOURCE_EXHAUSTED,
            Self::Protocol(_) => CODE_INVALID_REQUEST,
            Self::MethodNotFound(_) => CODE_METHOD_NOT_FOUND,
            Self::Auth(_) => CODE_AUTH_REQUIRED,
            Self::Backend(_) | Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                CODE_INTERNAL_ERROR
            }
        }
    }

    /// Whether the client may meaningfully retry the same request later.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_) | Self::SessionBusy(_) | Self::Resource(_) | Self::CircuitOpen
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "invalid params: {msg}"),
            Self::SessionNotFound(id) => write!(f, "Session not found: {id}"),
            Self::SessionBusy(id) => write!(f, "Session busy: {id}"),
            Self::Resource(msg) => write!(f, "resource exhausted: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::MethodNotFound(m) => write!(f, "method not found: {m}"),
            Self::Auth(msg) => write!(f, "authentication required: {msg}"),
            Self::Backend(msg) => write!(f, "backend: {msg}"),
            Self::CircuitOpen => write!(f, "circuit open: backend temporarily unavailable"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("json: {err}"))
    }
}
