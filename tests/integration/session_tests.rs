//! Session method tests: new, load, authenticate, validation.

use serde_json::json;

use super::harness::{self, ScriptedBackend};

#[tokio::test]
async fn new_session_returns_a_session_id() {
    let backend = ScriptedBackend::new(Vec::new());
    let mut host = harness::spawn(backend).await;

    let session_id = host.new_session(1).await;
    assert!(!session_id.is_empty());
}

#[tokio::test]
async fn new_sessions_get_distinct_ids() {
    let backend = ScriptedBackend::new(Vec::new());
    let mut host = harness::spawn(backend).await;

    let a = host.new_session(1).await;
    let b = host.new_session(2).await;
    assert_ne!(a, b);
}

#[tokio::test]
async fn relative_cwd_is_rejected() {
    let backend = ScriptedBackend::new(Vec::new());
    let mut host = harness::spawn(backend).await;

    host.request(1, "session/new", json!({"cwd":"relative/path","mcpServers":[]}))
        .await;
    let (_, response) = host.recv_until_response(1).await;
    assert_eq!(response["error"]["code"], -32602);
}

#[tokio::test]
async fn load_session_adopts_the_supplied_id() {
    let backend = ScriptedBackend::new(Vec::new());
    let mut host = harness::spawn(backend).await;

    host.request(
        1,
        "session/load",
        json!({"sessionId":"host-id-1","cwd":"/w","mcpServers":[]}),
    )
    .await;
    let (_, response) = host.recv_until_response(1).await;
    assert_eq!(response["result"], serde_json::Value::Null);

    // The adopted session is usable for prompts.
    host.request(2, "session/prompt", harness::text_prompt("host-id-1", "hi"))
        .await;
    let (_, response) = host.recv_until_response(2).await;
    assert_eq!(response["result"]["stopReason"], "end_turn");
}

#[tokio::test]
async fn authenticate_with_known_method_returns_null() {
    let backend = ScriptedBackend::new(Vec::new());
    let mut host = harness::spawn(backend).await;

    host.request(1, "authenticate", json!({"methodId":"backend"}))
        .await;
    let (_, response) = host.recv_until_response(1).await;
    assert_eq!(response["result"], serde_json::Value::Null);
}

#[tokio::test]
async fn authenticate_with_unknown_method_is_invalid() {
    let backend = ScriptedBackend::new(Vec::new());
    let mut host = harness::spawn(backend).await;

    host.request(1, "authenticate", json!({"methodId":"oauth"}))
        .await;
    let (_, response) = host.recv_until_response(1).await;
    assert_eq!(response["error"]["code"], -32602);
}
