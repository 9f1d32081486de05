//! Cancellation tests: mid-turn cancel, bounded flush, idempotence.

use serde_json::json;

use acp_bridge::backend::BackendEvent;

use super::harness::{self, ScriptedBackend, TurnScript};

#[tokio::test]
async fn cancel_mid_turn_resolves_prompt_with_cancelled() {
    let backend = ScriptedBackend::new(vec![TurnScript::EventsThenHold(vec![
        BackendEvent::AssistantText { text: "part".into() },
    ])]);
    let mut host = harness::spawn(backend).await;

    let session_id = host.new_session(1).await;
    host.request(2, "session/prompt", harness::text_prompt(&session_id, "work"))
        .await;

    let frame = host.recv().await;
    assert_eq!(harness::update_kind(&frame), Some("agent_message_chunk"));

    host.notify("session/cancel", json!({"sessionId": session_id}))
        .await;
    let (extra, response) = host.recv_until_response(2).await;

    // At most one further notification before the cancelled response.
    assert!(extra.len() <= 1, "{extra:?}");
    assert_eq!(response["result"]["stopReason"], "cancelled");
}

#[tokio::test]
async fn cancel_fails_open_tool_calls_before_responding() {
    let backend = ScriptedBackend::new(vec![TurnScript::EventsThenHold(vec![
        BackendEvent::ToolUse {
            id: "t1".into(),
            name: "Bash".into(),
            input: json!({"command":"cargo build"}),
        },
    ])]);
    let mut host = harness::spawn(backend).await;

    let session_id = host.new_session(1).await;
    host.request(2, "session/prompt", harness::text_prompt(&session_id, "compile it"))
        .await;

    // tool_call announcement arrives first.
    let frame = host.recv().await;
    assert_eq!(harness::update_kind(&frame), Some("tool_call"));
    assert_eq!(frame["params"]["update"]["status"], "pending");

    host.notify("session/cancel", json!({"sessionId": session_id}))
        .await;
    let (extra, response) = host.recv_until_response(2).await;

    // The open tool call was flushed as failed before the response.
    let failed = extra.iter().any(|f| {
        harness::update_kind(f) == Some("tool_call_update")
            && f["params"]["update"]["status"] == "failed"
            && f["params"]["update"]["id"] == "t1"
    });
    assert!(failed, "{extra:?}");
    assert_eq!(response["result"]["stopReason"], "cancelled");
}

#[tokio::test]
async fn cancel_for_idle_session_is_a_no_op() {
    let backend = ScriptedBackend::new(Vec::new());
    let mut host = harness::spawn(backend).await;

    let session_id = host.new_session(1).await;
    host.notify("session/cancel", json!({"sessionId": session_id}))
        .await;
    host.notify("session/cancel", json!({"sessionId":"unknown"}))
        .await;

    // The session still takes prompts afterwards.
    host.request(2, "session/prompt", harness::text_prompt(&session_id, "hi"))
        .await;
    let (_, response) = host.recv_until_response(2).await;
    assert_eq!(response["result"]["stopReason"], "end_turn");
}

#[tokio::test]
async fn session_is_reusable_after_a_cancelled_turn() {
    let backend = ScriptedBackend::new(vec![
        TurnScript::EventsThenHold(vec![BackendEvent::AssistantText {
            text: "part".into(),
        }]),
        TurnScript::Events(vec![
            BackendEvent::AssistantText { text: "done".into() },
            BackendEvent::TurnEnd,
        ]),
    ]);
    let mut host = harness::spawn(backend).await;

    let session_id = host.new_session(1).await;
    host.request(2, "session/prompt", harness::text_prompt(&session_id, "a"))
        .await;
    let _ = host.recv().await;
    host.notify("session/cancel", json!({"sessionId": session_id}))
        .await;
    let (_, cancelled) = host.recv_until_response(2).await;
    assert_eq!(cancelled["result"]["stopReason"], "cancelled");

    host.request(3, "session/prompt", harness::text_prompt(&session_id, "b"))
        .await;
    let (_, response) = host.recv_until_response(3).await;
    assert_eq!(response["result"]["stopReason"], "end_turn");
}
