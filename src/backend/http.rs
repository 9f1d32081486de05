//! HTTP completion backend adapter.
//!
//! One POST per turn against a completion endpoint. The response becomes a
//! single synthetic `AssistantText` event followed by `TurnEnd`; aborting a
//! turn drops the in-flight request, which closes the connection.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{BackendAgent, BackendEvent, TurnRequest, TurnStream};
use crate::config::HttpBackendConfig;
use crate::{AppError, Result};

/// Per-request timeout for the completion call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Completion endpoint response body.
#[derive(Debug, Deserialize)]
struct CompletionResponse {
    /// Conversation id to resume with, if the endpoint tracks one.
    #[serde(default)]
    conversation_id: Option<String>,
    /// The completion text.
    text: String,
}

/// HTTP completion adapter.
pub struct HttpAgent {
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpAgent {
    /// Create an adapter for the configured endpoint.
    #[must_use]
    pub fn new(config: HttpBackendConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }
}

impl BackendAgent for HttpAgent {
    fn name(&self) -> &'static str {
        "http"
    }

    fn authenticate(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.config.api_key.as_deref().unwrap_or("").is_empty() {
                return Err(AppError::Auth("BACKEND_API_KEY is not set".into()));
            }
            Ok(())
        })
    }

    fn start_turn(
        &self,
        request: TurnRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TurnStream>> + Send + '_>> {
        Box::pin(async move {
            let body = json!({
                "model": self.config.model,
                "prompt": request.prompt,
                "temperature": self.config.temperature,
                "max_tokens": self.config.max_tokens,
                "conversation_id": request.resume,
            });

            let mut builder = self.client.post(&self.config.api_url).json(&body);
            if let Some(ref key) = self.config.api_key {
                builder = builder.bearer_auth(key);
            }

            let (event_tx, event_rx) = mpsc::channel(8);
            let abort = CancellationToken::new();
            let abort_task = abort.clone();

            tokio::spawn(async move {
                let response = tokio::select! {
                    biased;

                    () = abort_task.cancelled() => {
                        debug!("http turn aborted before response");
                        return;
                    }

                    result = send_completion(builder) => result,
                };

                match response {
                    Ok(completion) => {
                        if let Some(id) = completion.conversation_id {
                            let _ = event_tx.send(BackendEvent::SessionAssigned { id }).await;
                        }
                        let _ = event_tx
                            .send(BackendEvent::AssistantText {
                                text: completion.text,
                            })
                            .await;
                        let _ = event_tx.send(BackendEvent::TurnEnd).await;
                    }
                    Err(err) => {
                        warn!(%err, "http completion failed");
                        let _ = event_tx
                            .send(BackendEvent::TurnError {
                                message: err.to_string(),
                            })
                            .await;
                    }
                }
            });

            Ok(TurnStream::new(event_rx, abort))
        })
    }

    fn version(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            reqwest::Url::parse(&self.config.api_url).map_err(|err| {
                AppError::Backend(format!(
                    "BACKEND_API_URL '{}' is invalid: {err}",
                    self.config.api_url
                ))
            })?;
            if self.config.api_key.as_deref().unwrap_or("").is_empty() {
                return Err(AppError::Backend(
                    "BACKEND_API_KEY is required for the http adapter".into(),
                ));
            }
            Ok(format!("http completion endpoint ({})", self.config.model))
        })
    }
}

/// Issue the request and decode the completion body.
async fn send_completion(builder: reqwest::RequestBuilder) -> Result<CompletionResponse> {
    let response = builder
        .send()
        .await
        .map_err(|err| AppError::Backend(format!("completion request failed: {err}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::Backend(format!(
            "completion endpoint returned {status}: {}",
            body.chars().take(200).collect::<String>()
        )));
    }

    response
        .json()
        .await
        .map_err(|err| AppError::Backend(format!("malformed completion response: {err}")))
}
