//! `--diagnose` health report.
//!
//! Prints a JSON snapshot of the platform, the (redacted) configuration,
//! the backend adapter probes, and the resource guard limits, then the
//! binary exits 0. Intended for bug reports and host-side setup checks.

use serde_json::{json, Value};

use crate::backend;
use crate::config::GlobalConfig;
use crate::guard::ResourceGuard;
use crate::protocol::PROTOCOL_VERSION;

/// Build the diagnose report.
pub async fn report(config: &GlobalConfig) -> Value {
    let selected = backend::select_backend(config).await;
    let guard = ResourceGuard::new(config.limits.clone());
    let snapshot = guard.snapshot();

    json!({
        "bridge": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "protocolVersion": PROTOCOL_VERSION,
        },
        "platform": {
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        },
        "config": config.redacted_summary(),
        "backend": {
            "adapter": selected.agent.name(),
            "version": selected.version,
            "fallback_reason": selected.fallback_reason,
        },
        "resources": {
            "limits": config.limits,
            "snapshot": snapshot,
        },
    })
}
