//! Global configuration from environment variables, with startup validation.
//!
//! The bridge is configured entirely through the environment so the host can
//! launch it with nothing but an executable path. Every recognized variable
//! is validated at startup; invalid values for the enumerated options fail
//! with a diagnostic naming the variable and the offending value.

use std::env;
use std::path::PathBuf;

use serde::Serialize;

use crate::session::model::PermissionMode;
use crate::{AppError, Result};

/// Which backend adapter to prefer at startup.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Long-running interactive subprocess speaking the NDJSON line protocol.
    #[default]
    Subprocess,
    /// One HTTP completion request per turn.
    Http,
}

/// Eviction strategy for the optional response caches.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Least-recently-used eviction.
    #[default]
    Lru,
    /// Least-frequently-used eviction.
    Lfu,
    /// Insertion-order eviction.
    Fifo,
}

/// Optional cache tuning. Validated but not consumed by the core pipeline.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of cached entries.
    pub max_size: usize,
    /// Entry time-to-live in milliseconds.
    pub ttl_ms: u64,
    /// Eviction strategy.
    pub strategy: CacheStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 256,
            ttl_ms: 300_000,
            strategy: CacheStrategy::default(),
        }
    }
}

/// Process-wide admission limits for the resource guard.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GuardLimits {
    /// Maximum concurrent sessions.
    pub max_concurrent_sessions: usize,
    /// Maximum concurrent in-flight operations.
    pub max_concurrent_operations: usize,
    /// RSS above this logs a warning (MiB).
    pub memory_warning_mib: u64,
    /// RSS above this refuses new admissions (MiB).
    pub memory_critical_mib: u64,
}

impl Default for GuardLimits {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 100,
            max_concurrent_operations: 50,
            memory_warning_mib: 512,
            memory_critical_mib: 768,
        }
    }
}

/// HTTP completion adapter settings.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HttpBackendConfig {
    /// Completion endpoint URL.
    pub api_url: String,
    /// Bearer token; never logged.
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Model identifier sent with each request.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-turn output token cap.
    pub max_tokens: u32,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8787/v1/completions".into(),
            api_key: None,
            model: "default".into(),
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

/// Global configuration assembled from the environment.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GlobalConfig {
    /// Initial permission mode for new sessions.
    pub permission_mode: PermissionMode,
    /// Per-turn backend turn cap; `0` means unlimited.
    pub max_turns: u32,
    /// Raise the stderr log level to `debug`.
    pub debug: bool,
    /// Duplicate logs to this file (buffered).
    pub log_file: Option<PathBuf>,
    /// Preferred backend adapter.
    pub backend_mode: BackendMode,
    /// Executable path for the subprocess adapter.
    pub backend_path: Option<String>,
    /// HTTP completion adapter settings.
    pub http: HttpBackendConfig,
    /// Optional cache tuning.
    pub cache: CacheConfig,
    /// Resource guard limits.
    pub limits: GuardLimits,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            permission_mode: PermissionMode::Default,
            max_turns: 0,
            debug: false,
            log_file: None,
            backend_mode: BackendMode::default(),
            backend_path: None,
            http: HttpBackendConfig::default(),
            cache: CacheConfig::default(),
            limits: GuardLimits::default(),
        }
    }
}

impl GlobalConfig {
    /// Assemble and validate configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the variable and the offending value
    /// when `PERMISSION_MODE`, `MAX_TURNS`, `BACKEND_MODE`, `CACHE_STRATEGY`,
    /// or any numeric option fails to parse.
    pub fn from_env() -> Result<Self> {
        let vars: Vec<(String, String)> = env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Assemble configuration from an explicit variable list (test seam).
    ///
    /// # Errors
    ///
    /// Same contract as [`GlobalConfig::from_env`].
    pub fn from_vars(vars: &[(String, String)]) -> Result<Self> {
        let get = |key: &str| -> Option<&str> {
            vars.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        let mut config = Self::default();

        if let Some(raw) = get("PERMISSION_MODE") {
            config.permission_mode = parse_permission_mode(raw)?;
        }
        if let Some(raw) = get("MAX_TURNS") {
            config.max_turns = raw.parse().map_err(|_| {
                AppError::Config(format!(
                    "MAX_TURNS must be a non-negative integer, got '{raw}'"
                ))
            })?;
        }
        config.debug = get("DEBUG").is_some_and(is_truthy);
        config.log_file = get("LOG_FILE").map(PathBuf::from);

        if let Some(raw) = get("BACKEND_MODE") {
            config.backend_mode = match raw {
                "subprocess" => BackendMode::Subprocess,
                "http" => BackendMode::Http,
                other => {
                    return Err(AppError::Config(format!(
                        "BACKEND_MODE must be 'subprocess' or 'http', got '{other}'"
                    )))
                }
            };
        }
        config.backend_path = get("BACKEND_PATH").map(str::to_owned);

        if let Some(url) = get("BACKEND_API_URL") {
            config.http.api_url = url.to_owned();
        }
        config.http.api_key = get("BACKEND_API_KEY").map(str::to_owned);
        if let Some(model) = get("BACKEND_MODEL") {
            config.http.model = model.to_owned();
        }
        if let Some(raw) = get("BACKEND_TEMPERATURE") {
            config.http.temperature = raw.parse().map_err(|_| {
                AppError::Config(format!("BACKEND_TEMPERATURE must be a number, got '{raw}'"))
            })?;
        }
        if let Some(raw) = get("BACKEND_MAX_TOKENS") {
            config.http.max_tokens = raw.parse().map_err(|_| {
                AppError::Config(format!(
                    "BACKEND_MAX_TOKENS must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        if let Some(raw) = get("CACHE_MAX_SIZE") {
            config.cache.max_size = raw.parse().map_err(|_| {
                AppError::Config(format!(
                    "CACHE_MAX_SIZE must be a non-negative integer, got '{raw}'"
                ))
            })?;
        }
        if let Some(raw) = get("CACHE_TTL_MS") {
            config.cache.ttl_ms = raw.parse().map_err(|_| {
                AppError::Config(format!(
                    "CACHE_TTL_MS must be a non-negative integer, got '{raw}'"
                ))
            })?;
        }
        if let Some(raw) = get("CACHE_STRATEGY") {
            config.cache.strategy = match raw {
                "lru" => CacheStrategy::Lru,
                "lfu" => CacheStrategy::Lfu,
                "fifo" => CacheStrategy::Fifo,
                other => {
                    return Err(AppError::Config(format!(
                        "CACHE_STRATEGY must be one of 'lru', 'lfu', 'fifo', got '{other}'"
                    )))
                }
            };
        }

        if let Some(raw) = get("MAX_CONCURRENT_SESSIONS") {
            config.limits.max_concurrent_sessions = parse_positive(raw, "MAX_CONCURRENT_SESSIONS")?;
        }
        if let Some(raw) = get("MAX_CONCURRENT_OPERATIONS") {
            config.limits.max_concurrent_operations =
                parse_positive(raw, "MAX_CONCURRENT_OPERATIONS")?;
        }
        if let Some(raw) = get("MEMORY_WARNING_MIB") {
            config.limits.memory_warning_mib = parse_positive(raw, "MEMORY_WARNING_MIB")? as u64;
        }
        if let Some(raw) = get("MEMORY_CRITICAL_MIB") {
            config.limits.memory_critical_mib = parse_positive(raw, "MEMORY_CRITICAL_MIB")? as u64;
        }

        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation after individual parses succeed.
    fn validate(&self) -> Result<()> {
        if self.limits.memory_critical_mib < self.limits.memory_warning_mib {
            return Err(AppError::Config(format!(
                "MEMORY_CRITICAL_MIB ({}) must be >= MEMORY_WARNING_MIB ({})",
                self.limits.memory_critical_mib, self.limits.memory_warning_mib
            )));
        }
        if self.backend_mode == BackendMode::Subprocess && self.backend_path.is_none() {
            // Not fatal: the startup probe falls back to the HTTP adapter and
            // records the reason.
            tracing::warn!("BACKEND_MODE=subprocess but BACKEND_PATH is unset");
        }
        Ok(())
    }

    /// Config summary with secrets redacted, for `--diagnose` and logs.
    #[must_use]
    pub fn redacted_summary(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(http) = value.get_mut("http") {
            http["api_key_present"] = serde_json::Value::Bool(self.http.api_key.is_some());
        }
        value
    }
}

/// Parse a permission mode string as used by `PERMISSION_MODE` and the
/// inline turn markers.
///
/// # Errors
///
/// Returns `AppError::Config` for unknown mode names.
pub fn parse_permission_mode(raw: &str) -> Result<PermissionMode> {
    match raw {
        "default" => Ok(PermissionMode::Default),
        "accept_edits" => Ok(PermissionMode::AcceptEdits),
        "bypass_permissions" => Ok(PermissionMode::BypassPermissions),
        "plan" => Ok(PermissionMode::Plan),
        other => Err(AppError::Config(format!(
            "PERMISSION_MODE must be one of 'default', 'accept_edits', \
             'bypass_permissions', 'plan', got '{other}'"
        ))),
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw, "1" | "true" | "TRUE" | "yes" | "on")
}

fn parse_positive(raw: &str, var: &str) -> Result<usize> {
    raw.parse()
        .map_err(|_| AppError::Config(format!("{var} must be a positive integer, got '{raw}'")))
}
