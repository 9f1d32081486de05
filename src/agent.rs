//! Agent facade — the ACP server methods.
//!
//! Implements [`RpcHandler`] for the six host-facing methods and fans out
//! to the session manager, permission broker, and turn executor. Prompt
//! handling takes the session lock with `try_lock`; the failure branch is
//! the wire-visible "session busy" error.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::protocol::{
    AgentCapabilities, AuthMethod, AuthenticateParams, CancelParams, InitializeParams,
    InitializeResult, LoadSessionParams, NewSessionParams, NewSessionResult, PromptCapabilities,
    PromptParams, PromptResult,
};
use crate::rpc::RpcHandler;
use crate::session::SessionManager;
use crate::turn::{self, TurnServices};
use crate::{AppError, Result};

/// The ACP-facing agent surface.
pub struct AgentFacade {
    manager: Arc<SessionManager>,
    services: TurnServices,
}

impl AgentFacade {
    /// Assemble the facade over the shared services.
    #[must_use]
    pub fn new(manager: Arc<SessionManager>, services: TurnServices) -> Self {
        Self { manager, services }
    }

    async fn initialize(&self, params: Value) -> Result<Value> {
        let params: InitializeParams = parse_params(params)?;
        info!(protocol_version = %params.protocol_version, "initialize");

        let result = InitializeResult {
            protocol_version: params.protocol_version,
            agent_capabilities: AgentCapabilities {
                load_session: true,
                prompt_capabilities: PromptCapabilities {
                    image: true,
                    audio: false,
                    embedded_context: true,
                },
            },
            auth_methods: vec![AuthMethod {
                id: "backend".into(),
                name: "Backend".into(),
                description: "Authentication via backend agent".into(),
            }],
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn new_session(&self, params: Value) -> Result<Value> {
        let params: NewSessionParams = parse_params(params)?;
        let cwd = validated_cwd(&params.cwd)?;
        let entry = self.manager.create(cwd, params.mcp_servers)?;
        Ok(serde_json::to_value(NewSessionResult {
            session_id: entry.id.clone(),
        })?)
    }

    async fn load_session(&self, params: Value) -> Result<Value> {
        let params: LoadSessionParams = parse_params(params)?;
        let cwd = validated_cwd(&params.cwd)?;
        self.manager
            .adopt(&params.session_id, cwd, params.mcp_servers)?;
        Ok(Value::Null)
    }

    async fn authenticate(&self, params: Value) -> Result<Value> {
        let params: AuthenticateParams = parse_params(params)?;
        if params.method_id != "backend" {
            return Err(AppError::Validation(format!(
                "unknown auth method '{}'",
                params.method_id
            )));
        }
        self.services
            .backend
            .authenticate()
            .await
            .map_err(|err| AppError::Auth(err.to_string()))?;
        Ok(Value::Null)
    }

    async fn prompt(&self, params: Value) -> Result<Value> {
        let params: PromptParams = parse_params(params)?;
        let entry = self.manager.get(&params.session_id)?;

        // The session lock is the turn mutual exclusion; a held lock means
        // a turn is in flight and the client must wait for its response.
        let Ok(mut state) = entry.lock.try_lock() else {
            return Err(AppError::SessionBusy(params.session_id.clone()));
        };

        let cancel = entry.begin_turn();
        let outcome = turn::run_turn(
            &self.services,
            &entry,
            &mut state,
            &params.prompt,
            &cancel,
        )
        .await;
        entry.end_turn();
        drop(state);

        let stop_reason = outcome?;
        debug!(session_id = %params.session_id, ?stop_reason, "turn finished");
        Ok(serde_json::to_value(PromptResult { stop_reason })?)
    }

    fn cancel(&self, params: Value) {
        match serde_json::from_value::<CancelParams>(params) {
            Ok(params) => self.manager.cancel(&params.session_id),
            Err(err) => warn!(%err, "malformed session/cancel params, ignoring"),
        }
    }
}

impl RpcHandler for AgentFacade {
    fn handle_request(
        &self,
        method: String,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
        Box::pin(async move {
            match method.as_str() {
                "initialize" => self.initialize(params).await,
                "session/new" => self.new_session(params).await,
                "session/load" => self.load_session(params).await,
                "authenticate" => self.authenticate(params).await,
                "session/prompt" => self.prompt(params).await,
                other => Err(AppError::MethodNotFound(other.to_owned())),
            }
        })
    }

    fn handle_notification(
        &self,
        method: String,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            match method.as_str() {
                "session/cancel" => self.cancel(params),
                other => debug!(method = other, "unhandled notification, ignoring"),
            }
        })
    }
}

/// Deserialize params, mapping failures to `-32602` with serde's path info.
fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|err| AppError::Validation(err.to_string()))
}

/// Require an absolute workspace root.
fn validated_cwd(raw: &str) -> Result<PathBuf> {
    let cwd = PathBuf::from(raw);
    if !cwd.is_absolute() {
        return Err(AppError::Validation(format!(
            "cwd must be an absolute path, got '{raw}'"
        )));
    }
    Ok(cwd)
}
