#![forbid(unsafe_code)]

//! `acp-bridge` — Agent Client Protocol bridge binary.
//!
//! Adapts a local coding-assistant backend (interactive subprocess or HTTP
//! completion API) to the ACP JSON-RPC stdio protocol spoken by editor
//! hosts. The protocol runs on stdin/stdout; all diagnostics go to stderr.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use acp_bridge::agent::AgentFacade;
use acp_bridge::backend;
use acp_bridge::config::GlobalConfig;
use acp_bridge::guard::breaker::BreakerConfig;
use acp_bridge::guard::{context, CircuitBreaker, ContextMonitor, ResourceGuard};
use acp_bridge::permission::PermissionBroker;
use acp_bridge::rpc::transport::{self, OUTBOUND_QUEUE_FRAMES};
use acp_bridge::rpc::{RpcEndpoint, RpcHandler};
use acp_bridge::session::SessionManager;
use acp_bridge::turn::TurnServices;
use acp_bridge::{diagnose, logging, AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "acp-bridge",
    about = "Agent Client Protocol bridge for a local coding-assistant backend",
    version,
    long_about = None
)]
struct Cli {
    /// Print a JSON platform/backend health report and exit.
    #[arg(long)]
    diagnose: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let config = GlobalConfig::from_env().map_err(|err| {
        eprintln!("acp-bridge: {err}");
        err
    })?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args, config))
}

async fn run(args: Cli, config: GlobalConfig) -> Result<()> {
    if args.diagnose {
        let report = diagnose::report(&config).await;
        println!(
            "{}",
            serde_json::to_string_pretty(&report)
                .map_err(|err| AppError::Internal(format!("report serialisation: {err}")))?
        );
        return Ok(());
    }

    let ct = CancellationToken::new();
    let log_handle = logging::init(config.debug, config.log_file.as_deref(), &ct)?;
    info!(version = env!("CARGO_PKG_VERSION"), "acp-bridge bootstrap");

    // ── Backend adapter selection ───────────────────────
    let selected = backend::select_backend(&config).await;
    if let Some(ref reason) = selected.fallback_reason {
        warn!(reason = reason.as_str(), "backend adapter fallback");
    }

    // ── Process-wide services ───────────────────────────
    let guard = Arc::new(ResourceGuard::new(config.limits.clone()));
    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
    let monitor = Arc::new(ContextMonitor::new());
    let sweep_handle = context::spawn_sweep_task(Arc::clone(&monitor), ct.clone());

    // ── Transport + endpoint ────────────────────────────
    let (frame_tx, frame_rx) = mpsc::channel(OUTBOUND_QUEUE_FRAMES);
    let endpoint = Arc::new(RpcEndpoint::new(frame_tx));

    let manager = Arc::new(SessionManager::new(
        Arc::clone(&guard),
        config.permission_mode,
    ));

    let services = TurnServices {
        endpoint: Arc::clone(&endpoint),
        broker: PermissionBroker::new(Arc::clone(&endpoint)),
        breaker,
        guard,
        monitor,
        backend: selected.agent,
        max_turns: config.max_turns,
    };
    let facade: Arc<dyn RpcHandler> = Arc::new(AgentFacade::new(Arc::clone(&manager), services));

    let writer_ct = ct.clone();
    let writer_handle = tokio::spawn(async move {
        if let Err(err) = transport::run_writer(tokio::io::stdout(), frame_rx, writer_ct).await {
            error!(%err, "transport writer failed");
        }
    });

    let reader_ct = ct.clone();
    let reader_endpoint = Arc::clone(&endpoint);
    let reader_handle = tokio::spawn(async move {
        if let Err(err) =
            transport::run_reader(tokio::io::stdin(), reader_endpoint, facade, reader_ct).await
        {
            error!(%err, "transport reader failed");
        }
    });

    info!("bridge ready on stdio");

    // ── Wait for shutdown: input EOF, SIGINT, or SIGTERM ─
    tokio::select! {
        () = ct.cancelled() => {
            info!("transport closed — starting graceful shutdown");
        }
        () = shutdown_signal() => {
            info!("shutdown signal received — starting graceful shutdown");
            ct.cancel();
        }
    }

    shutdown_with_timeout(
        &manager,
        &endpoint,
        reader_handle,
        writer_handle,
        sweep_handle,
        log_handle,
    )
    .await;

    info!("acp-bridge shut down");
    Ok(())
}

/// Maximum time to wait for graceful shutdown before giving up.
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Dispose sessions (cancelling all turns), reject pending requests, and
/// wait for the transport tasks within [`SHUTDOWN_TIMEOUT`].
async fn shutdown_with_timeout(
    manager: &SessionManager,
    endpoint: &RpcEndpoint,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
    sweep_handle: tokio::task::JoinHandle<()>,
    log_handle: Option<tokio::task::JoinHandle<()>>,
) {
    manager.dispose_all();
    endpoint.shutdown();

    let join_all = async {
        let _ = reader_handle.await;
        let _ = writer_handle.await;
        let _ = sweep_handle.await;
        if let Some(handle) = log_handle {
            let _ = handle.await;
        }
    };

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, join_all).await.is_err() {
        error!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "graceful shutdown timed out — exiting"
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}
