//! Initialize handshake wire-shape tests.

use serde_json::json;

use super::harness::{self, ScriptedBackend};

#[tokio::test]
async fn initialize_returns_capabilities_and_auth_methods() {
    let backend = ScriptedBackend::new(Vec::new());
    let mut host = harness::spawn(backend).await;

    host.request(
        1,
        "initialize",
        json!({"protocolVersion":"0.1.0","clientCapabilities":{}}),
    )
    .await;
    let (seen, response) = host.recv_until_response(1).await;

    assert!(seen.is_empty(), "no frames before the response: {seen:?}");
    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(
        response["result"],
        json!({
            "protocolVersion": "0.1.0",
            "agentCapabilities": {
                "loadSession": true,
                "promptCapabilities": {
                    "image": true,
                    "audio": false,
                    "embeddedContext": true,
                },
            },
            "authMethods": [{
                "id": "backend",
                "name": "Backend",
                "description": "Authentication via backend agent",
            }],
        })
    );
}

#[tokio::test]
async fn initialize_echoes_the_host_protocol_version() {
    let backend = ScriptedBackend::new(Vec::new());
    let mut host = harness::spawn(backend).await;

    host.request(
        1,
        "initialize",
        json!({"protocolVersion":"0.2.7","clientCapabilities":{"fs":true}}),
    )
    .await;
    let (_, response) = host.recv_until_response(1).await;
    assert_eq!(response["result"]["protocolVersion"], "0.2.7");
}

#[tokio::test]
async fn missing_params_yield_invalid_params() {
    let backend = ScriptedBackend::new(Vec::new());
    let mut host = harness::spawn(backend).await;

    host.request(1, "initialize", json!({})).await;
    let (_, response) = host.recv_until_response(1).await;
    assert_eq!(response["error"]["code"], -32602);
}

#[tokio::test]
async fn unknown_method_yields_method_not_found() {
    let backend = ScriptedBackend::new(Vec::new());
    let mut host = harness::spawn(backend).await;

    host.request(1, "session/unknown", json!({})).await;
    let (_, response) = host.recv_until_response(1).await;
    assert_eq!(response["error"]["code"], -32601);
}

#[tokio::test]
async fn unparseable_line_yields_parse_error_with_null_id() {
    let backend = ScriptedBackend::new(Vec::new());
    let mut host = harness::spawn(backend).await;

    host.send_raw("{not valid json").await;
    let frame = host.recv().await;
    assert_eq!(frame["id"], serde_json::Value::Null);
    assert_eq!(frame["error"]["code"], -32700);
}
