//! RPC endpoint: inbound dispatch and outbound correlation.
//!
//! The endpoint sits between the framed transport and the agent facade. It
//! classifies each inbound frame, invokes the registered [`RpcHandler`] for
//! requests and notifications (each on its own task so a long turn never
//! blocks the reader), and resolves pending outbound requests by id.
//!
//! All outbound frames — responses, notifications, and the bridge's own
//! requests — go through one bounded queue drained by the single writer
//! task, which guarantees frame atomicity and per-session ordering.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::errors::{
    CODE_AUTH_REQUIRED, CODE_RESOURCE_EXHAUSTED, CODE_SESSION_BUSY, CODE_SESSION_NOT_FOUND,
};
use crate::rpc::message::{
    self, Inbound, RpcErrorObject, RpcId,
};
use crate::{AppError, Result};

/// Handler for inbound requests and notifications.
///
/// Implemented by the agent facade. Returned futures are boxed so the trait
/// stays object-safe, matching the driver-trait seam style used throughout
/// the crate.
pub trait RpcHandler: Send + Sync {
    /// Handle an inbound request; the returned value becomes the response.
    fn handle_request(
        &self,
        method: String,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>>;

    /// Handle an inbound notification; no response is produced.
    fn handle_notification(
        &self,
        method: String,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

type PendingMap = Mutex<HashMap<i64, oneshot::Sender<std::result::Result<Value, RpcErrorObject>>>>;

/// Bidirectional JSON-RPC endpoint over the shared writer queue.
pub struct RpcEndpoint {
    outbound_tx: mpsc::Sender<Value>,
    next_id: AtomicI64,
    pending: PendingMap,
    closed: AtomicBool,
}

impl RpcEndpoint {
    /// Create an endpoint that writes frames into `outbound_tx`.
    #[must_use]
    pub fn new(outbound_tx: mpsc::Sender<Value>) -> Self {
        Self {
            outbound_tx,
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue an outbound notification.
    ///
    /// Awaits queue capacity; this is the transport backpressure point.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`] once the endpoint is shut down.
    pub async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        self.enqueue(message::notification_frame(method, params))
            .await
    }

    /// Queue a response to an inbound request.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`] once the endpoint is shut down.
    pub async fn send_response(&self, id: &RpcId, result: Value) -> Result<()> {
        self.enqueue(message::response_frame(id, result)).await
    }

    /// Queue an error response to an inbound request.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`] once the endpoint is shut down.
    pub async fn send_error(&self, id: Option<&RpcId>, error: &RpcErrorObject) -> Result<()> {
        self.enqueue(message::error_frame(id, error)).await
    }

    /// Queue a pre-built frame (used by the reader for parse-error replies).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`] once the endpoint is shut down.
    pub async fn send_raw(&self, frame: Value) -> Result<()> {
        self.enqueue(frame).await
    }

    /// Send a request to the host and await its answer.
    ///
    /// Ids are drawn from a process-wide monotonic counter. The future
    /// resolves when the matching response frame arrives, or rejects with
    /// `resource exhausted: connection destroyed` on shutdown.
    ///
    /// # Errors
    ///
    /// - [`AppError::Resource`] — endpoint shut down before or during the wait.
    /// - Host-reported error objects mapped back through the wire-code
    ///   taxonomy.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.insert(id, tx);
        }

        if let Err(err) = self.enqueue(message::request_frame(id, method, params)).await {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(&id);
            return Err(err);
        }

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(app_error_from_wire(&error)),
            Err(_) => Err(AppError::Resource("connection destroyed".into())),
        }
    }

    /// Dispatch one classified-or-raw inbound frame.
    ///
    /// Requests and notifications run on their own tasks so long-running
    /// handlers (turns, permission prompts) never block the reader loop.
    pub fn dispatch(self: &Arc<Self>, frame: Value, handler: &Arc<dyn RpcHandler>) {
        match message::classify(frame) {
            Ok(Inbound::Request { id, method, params }) => {
                let endpoint = Arc::clone(self);
                let handler = Arc::clone(handler);
                tokio::spawn(async move {
                    let outcome = handler.handle_request(method, params).await;
                    let send_result = match outcome {
                        Ok(result) => endpoint.send_response(&id, result).await,
                        Err(err) => {
                            endpoint
                                .send_error(Some(&id), &RpcErrorObject::from_app_error(&err))
                                .await
                        }
                    };
                    if let Err(err) = send_result {
                        debug!(%err, "response dropped: endpoint closed");
                    }
                });
            }
            Ok(Inbound::Notification { method, params }) => {
                let handler = Arc::clone(handler);
                tokio::spawn(async move {
                    handler.handle_notification(method, params).await;
                });
            }
            Ok(Inbound::Response { id, result, error }) => {
                self.resolve_response(&id, result, error);
            }
            Err(err) => {
                let endpoint = Arc::clone(self);
                tokio::spawn(async move {
                    let frame = message::invalid_request_frame(&err.to_string());
                    if endpoint.enqueue(frame).await.is_err() {
                        debug!("invalid-request response dropped: endpoint closed");
                    }
                });
            }
        }
    }

    /// Resolve a pending outbound request from an inbound response frame.
    fn resolve_response(&self, id: &RpcId, result: Option<Value>, error: Option<RpcErrorObject>) {
        let RpcId::Number(num) = id else {
            warn!(?id, "response with unknown string id, dropping");
            return;
        };

        let sender = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(num)
        };

        let Some(sender) = sender else {
            warn!(id = num, "response for unknown or completed request, dropping");
            return;
        };

        let payload = match error {
            Some(error) => Err(error),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        let _ = sender.send(payload);
    }

    /// Reject every pending outbound request and refuse further sends.
    ///
    /// Pending futures resolve with code `-32003` "connection destroyed".
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().collect()
        };
        for (id, sender) in drained {
            debug!(id, "rejecting pending request on shutdown");
            let _ = sender.send(Err(RpcErrorObject {
                code: CODE_RESOURCE_EXHAUSTED,
                message: "connection destroyed".into(),
                data: None,
            }));
        }
    }

    async fn enqueue(&self, frame: Value) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::Resource("connection destroyed".into()));
        }
        self.outbound_tx
            .send(frame)
            .await
            .map_err(|_| AppError::Resource("connection destroyed".into()))
    }
}

/// Map a host-reported wire error back into the internal taxonomy.
fn app_error_from_wire(error: &RpcErrorObject) -> AppError {
    match error.code {
        CODE_SESSION_NOT_FOUND => AppError::SessionNotFound(error.message.clone()),
        CODE_SESSION_BUSY => AppError::SessionBusy(error.message.clone()),
        CODE_RESOURCE_EXHAUSTED => AppError::Resource(error.message.clone()),
        CODE_AUTH_REQUIRED => AppError::Auth(error.message.clone()),
        _ => AppError::Internal(format!("host error {}: {}", error.code, error.message)),
    }
}
