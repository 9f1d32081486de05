//! JSON-RPC 2.0 envelope model and frame classification.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{CODE_INVALID_REQUEST, CODE_PARSE_ERROR};
use crate::AppError;

/// A request or response correlation id: string or number per JSON-RPC 2.0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RpcId {
    /// Numeric id (the bridge's own outbound requests use these).
    Number(i64),
    /// String id.
    String(String),
}

/// Error object carried in an error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    /// Build an error object from an [`AppError`], using its wire code.
    #[must_use]
    pub fn from_app_error(err: &AppError) -> Self {
        Self {
            code: err.json_rpc_code(),
            message: err.to_string(),
            data: None,
        }
    }
}

/// An inbound frame classified per JSON-RPC 2.0 shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `method` + `id`: expects exactly one response.
    Request {
        /// Correlation id to echo back.
        id: RpcId,
        /// Method name.
        method: String,
        /// Raw params.
        params: Value,
    },
    /// `method` without `id`: fire-and-forget.
    Notification {
        /// Method name.
        method: String,
        /// Raw params.
        params: Value,
    },
    /// `id` without `method`: answer to one of our outbound requests.
    Response {
        /// Correlation id of the outbound request.
        id: RpcId,
        /// Result value on success.
        result: Option<Value>,
        /// Error object on failure.
        error: Option<RpcErrorObject>,
    },
}

/// Classify a decoded JSON value into an [`Inbound`] frame.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] when the value has neither a `method` nor
/// an `id`, or when `id`/`error` fields have invalid shapes.
pub fn classify(frame: Value) -> crate::Result<Inbound> {
    let method = frame
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let id = match frame.get("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            serde_json::from_value::<RpcId>(raw.clone())
                .map_err(|_| AppError::Protocol("id must be a string or number".into()))?,
        ),
    };
    let params = frame.get("params").cloned().unwrap_or(Value::Null);

    match (method, id) {
        (Some(method), Some(id)) => Ok(Inbound::Request { id, method, params }),
        (Some(method), None) => Ok(Inbound::Notification { method, params }),
        (None, Some(id)) => {
            let error = match frame.get("error") {
                None | Some(Value::Null) => None,
                Some(raw) => Some(
                    serde_json::from_value::<RpcErrorObject>(raw.clone())
                        .map_err(|_| AppError::Protocol("malformed error object".into()))?,
                ),
            };
            Ok(Inbound::Response {
                id,
                result: frame.get("result").cloned(),
                error,
            })
        }
        (None, None) => Err(AppError::Protocol(
            "frame has neither method nor id".into(),
        )),
    }
}

// ── Frame builders ────────────────────────────────────────────────────────────

/// Build a success response frame.
#[must_use]
pub fn response_frame(id: &RpcId, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Build an error response frame.
#[must_use]
pub fn error_frame(id: Option<&RpcId>, error: &RpcErrorObject) -> Value {
    match id {
        Some(id) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
        None => json!({ "jsonrpc": "2.0", "id": Value::Null, "error": error }),
    }
}

/// Build the parse-error response emitted when a line is not valid JSON.
#[must_use]
pub fn parse_error_frame(detail: &str) -> Value {
    error_frame(
        None,
        &RpcErrorObject {
            code: CODE_PARSE_ERROR,
            message: format!("Parse error: {detail}"),
            data: None,
        },
    )
}

/// Build the invalid-request response for frames that defeat classification.
#[must_use]
pub fn invalid_request_frame(detail: &str) -> Value {
    error_frame(
        None,
        &RpcErrorObject {
            code: CODE_INVALID_REQUEST,
            message: format!("Invalid request: {detail}"),
            data: None,
        },
    )
}

/// Build an outbound request frame.
#[must_use]
pub fn request_frame(id: i64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

/// Build an outbound notification frame.
#[must_use]
pub fn notification_frame(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params })
}
