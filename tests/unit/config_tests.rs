//! Unit tests for environment configuration parsing and validation.

use acp_bridge::config::{BackendMode, CacheStrategy, GlobalConfig};
use acp_bridge::session::model::PermissionMode;

fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

#[test]
fn defaults_apply_with_empty_environment() {
    let config = GlobalConfig::from_vars(&[]).expect("defaults are valid");
    assert_eq!(config.permission_mode, PermissionMode::Default);
    assert_eq!(config.max_turns, 0);
    assert!(!config.debug);
    assert!(config.log_file.is_none());
    assert_eq!(config.backend_mode, BackendMode::Subprocess);
    assert_eq!(config.limits.max_concurrent_sessions, 100);
    assert_eq!(config.limits.max_concurrent_operations, 50);
    assert_eq!(config.limits.memory_warning_mib, 512);
    assert_eq!(config.limits.memory_critical_mib, 768);
}

#[test]
fn permission_mode_values_parse() {
    for (raw, expected) in [
        ("default", PermissionMode::Default),
        ("accept_edits", PermissionMode::AcceptEdits),
        ("bypass_permissions", PermissionMode::BypassPermissions),
        ("plan", PermissionMode::Plan),
    ] {
        let config =
            GlobalConfig::from_vars(&vars(&[("PERMISSION_MODE", raw)])).expect("valid mode");
        assert_eq!(config.permission_mode, expected, "mode {raw}");
    }
}

#[test]
fn invalid_permission_mode_fails_startup_with_diagnostic() {
    let err = GlobalConfig::from_vars(&vars(&[("PERMISSION_MODE", "yolo")])).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("PERMISSION_MODE"), "{msg}");
    assert!(msg.contains("yolo"), "{msg}");
}

#[test]
fn invalid_max_turns_fails_startup_with_diagnostic() {
    let err = GlobalConfig::from_vars(&vars(&[("MAX_TURNS", "-3")])).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("MAX_TURNS"), "{msg}");
    assert!(msg.contains("-3"), "{msg}");
}

#[test]
fn max_turns_zero_means_unlimited() {
    let config = GlobalConfig::from_vars(&vars(&[("MAX_TURNS", "0")])).expect("valid");
    assert_eq!(config.max_turns, 0);
}

#[test]
fn backend_mode_http_selects_http_adapter() {
    let config = GlobalConfig::from_vars(&vars(&[
        ("BACKEND_MODE", "http"),
        ("BACKEND_API_KEY", "sk-test"),
        ("BACKEND_MODEL", "large"),
        ("BACKEND_TEMPERATURE", "0.7"),
        ("BACKEND_MAX_TOKENS", "1024"),
    ]))
    .expect("valid");
    assert_eq!(config.backend_mode, BackendMode::Http);
    assert_eq!(config.http.model, "large");
    assert!((config.http.temperature - 0.7).abs() < f32::EPSILON);
    assert_eq!(config.http.max_tokens, 1024);
}

#[test]
fn invalid_backend_mode_fails() {
    let err = GlobalConfig::from_vars(&vars(&[("BACKEND_MODE", "grpc")])).unwrap_err();
    assert!(err.to_string().contains("BACKEND_MODE"), "{err}");
}

#[test]
fn cache_strategy_values_parse() {
    for (raw, expected) in [
        ("lru", CacheStrategy::Lru),
        ("lfu", CacheStrategy::Lfu),
        ("fifo", CacheStrategy::Fifo),
    ] {
        let config =
            GlobalConfig::from_vars(&vars(&[("CACHE_STRATEGY", raw)])).expect("valid strategy");
        assert_eq!(config.cache.strategy, expected, "strategy {raw}");
    }

    let err = GlobalConfig::from_vars(&vars(&[("CACHE_STRATEGY", "random")])).unwrap_err();
    assert!(err.to_string().contains("CACHE_STRATEGY"), "{err}");
}

#[test]
fn debug_flag_accepts_truthy_values() {
    for raw in ["1", "true", "yes", "on"] {
        let config = GlobalConfig::from_vars(&vars(&[("DEBUG", raw)])).expect("valid");
        assert!(config.debug, "DEBUG={raw}");
    }
    let config = GlobalConfig::from_vars(&vars(&[("DEBUG", "false")])).expect("valid");
    assert!(!config.debug);
}

#[test]
fn log_file_path_is_captured() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bridge.log");
    let config = GlobalConfig::from_vars(&vars(&[(
        "LOG_FILE",
        path.to_str().expect("utf8 path"),
    )]))
    .expect("valid");
    assert_eq!(config.log_file.as_deref(), Some(path.as_path()));
}

#[test]
fn memory_thresholds_must_be_ordered() {
    let err = GlobalConfig::from_vars(&vars(&[
        ("MEMORY_WARNING_MIB", "800"),
        ("MEMORY_CRITICAL_MIB", "700"),
    ]))
    .unwrap_err();
    assert!(err.to_string().contains("MEMORY_CRITICAL_MIB"), "{err}");
}

#[test]
fn redacted_summary_never_contains_the_api_key() {
    let config = GlobalConfig::from_vars(&vars(&[("BACKEND_API_KEY", "sk-secret-value")]))
        .expect("valid");
    let summary = serde_json::to_string(&config.redacted_summary()).expect("serializable");
    assert!(!summary.contains("sk-secret-value"), "{summary}");
    assert!(summary.contains("api_key_present"), "{summary}");
}
