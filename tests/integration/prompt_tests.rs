//! Prompt turn tests: streaming order, busy sessions, unknown sessions.

use serde_json::json;

use acp_bridge::backend::BackendEvent;

use super::harness::{self, ScriptedBackend, TurnScript};

#[tokio::test]
async fn simple_prompt_streams_chunk_then_response() {
    let backend = ScriptedBackend::new(vec![TurnScript::Events(vec![
        BackendEvent::AssistantText {
            text: "hello".into(),
        },
        BackendEvent::TurnEnd,
    ])]);
    let mut host = harness::spawn(backend).await;

    let session_id = host.new_session(1).await;
    host.request(2, "session/prompt", harness::text_prompt(&session_id, "hi"))
        .await;

    let (seen, response) = host.recv_until_response(2).await;

    // Exactly one agent_message_chunk, delivered before the response.
    assert_eq!(seen.len(), 1, "{seen:?}");
    assert_eq!(harness::update_kind(&seen[0]), Some("agent_message_chunk"));
    assert_eq!(seen[0]["params"]["sessionId"], json!(session_id));
    assert_eq!(
        seen[0]["params"]["update"]["content"],
        json!({"type":"text","text":"hello"})
    );
    assert_eq!(response["result"]["stopReason"], "end_turn");
}

#[tokio::test]
async fn thought_chunks_are_forwarded() {
    let backend = ScriptedBackend::new(vec![TurnScript::Events(vec![
        BackendEvent::AssistantThought {
            text: "pondering".into(),
        },
        BackendEvent::AssistantText {
            text: "answer".into(),
        },
        BackendEvent::TurnEnd,
    ])]);
    let mut host = harness::spawn(backend).await;

    let session_id = host.new_session(1).await;
    host.request(2, "session/prompt", harness::text_prompt(&session_id, "why?"))
        .await;
    let (seen, response) = host.recv_until_response(2).await;

    let kinds: Vec<_> = seen.iter().filter_map(harness::update_kind).collect();
    assert_eq!(kinds, vec!["agent_thought_chunk", "agent_message_chunk"]);
    assert_eq!(response["result"]["stopReason"], "end_turn");
}

#[tokio::test]
async fn busy_session_rejects_concurrent_prompt() {
    let backend = ScriptedBackend::new(vec![TurnScript::EventsThenHold(vec![
        BackendEvent::AssistantText {
            text: "started".into(),
        },
    ])]);
    let mut host = harness::spawn(backend).await;

    let session_id = host.new_session(1).await;
    host.request(2, "session/prompt", harness::text_prompt(&session_id, "long job"))
        .await;

    // Wait until the first turn is demonstrably running.
    let frame = host.recv().await;
    assert_eq!(harness::update_kind(&frame), Some("agent_message_chunk"));

    host.request(3, "session/prompt", harness::text_prompt(&session_id, "again"))
        .await;
    let (_, busy) = host.recv_until_response(3).await;
    assert_eq!(busy["error"]["code"], -32002);
    assert_eq!(
        busy["error"]["message"],
        json!(format!("Session busy: {session_id}"))
    );

    // The in-flight turn is unaffected; cancel it to finish cleanly.
    host.notify("session/cancel", json!({"sessionId": session_id}))
        .await;
    let (_, first) = host.recv_until_response(2).await;
    assert_eq!(first["result"]["stopReason"], "cancelled");
}

#[tokio::test]
async fn prompt_for_unknown_session_is_not_found() {
    let backend = ScriptedBackend::new(Vec::new());
    let mut host = harness::spawn(backend).await;

    host.request(1, "session/prompt", harness::text_prompt("nope", "hi"))
        .await;
    let (_, response) = host.recv_until_response(1).await;
    assert_eq!(response["error"]["code"], -32001);
}

#[tokio::test]
async fn backend_turn_error_is_surfaced_in_band() {
    let backend = ScriptedBackend::new(vec![TurnScript::Events(vec![
        BackendEvent::TurnError {
            message: "model exploded".into(),
        },
    ])]);
    let mut host = harness::spawn(backend).await;

    let session_id = host.new_session(1).await;
    host.request(2, "session/prompt", harness::text_prompt(&session_id, "hi"))
        .await;
    let (seen, response) = host.recv_until_response(2).await;

    assert_eq!(harness::update_kind(&seen[0]), Some("agent_message_chunk"));
    let text = seen[0]["params"]["update"]["content"]["text"]
        .as_str()
        .expect("text");
    assert!(text.contains("model exploded"), "{text}");
    // In-band errors still end the turn normally.
    assert_eq!(response["result"]["stopReason"], "end_turn");
}

#[tokio::test]
async fn session_id_assignment_is_resumed_on_the_next_turn() {
    let backend = ScriptedBackend::new(vec![
        TurnScript::Events(vec![
            BackendEvent::SessionAssigned {
                id: "conv-7".into(),
            },
            BackendEvent::AssistantText { text: "ok".into() },
            BackendEvent::TurnEnd,
        ]),
        TurnScript::Events(vec![
            BackendEvent::AssistantText {
                text: "again".into(),
            },
            BackendEvent::TurnEnd,
        ]),
    ]);
    let mut host = harness::spawn(backend).await;

    let session_id = host.new_session(1).await;
    host.request(2, "session/prompt", harness::text_prompt(&session_id, "one"))
        .await;
    let (_, first) = host.recv_until_response(2).await;
    assert_eq!(first["result"]["stopReason"], "end_turn");

    host.request(3, "session/prompt", harness::text_prompt(&session_id, "two"))
        .await;
    let (_, second) = host.recv_until_response(3).await;
    assert_eq!(second["result"]["stopReason"], "end_turn");
    assert_eq!(host.backend.started_turns(), 2);
}

#[tokio::test]
async fn complex_prompt_emits_a_plan_before_chunks() {
    let backend = ScriptedBackend::new(vec![TurnScript::Events(vec![
        BackendEvent::AssistantText { text: "on it".into() },
        BackendEvent::TurnEnd,
    ])]);
    let mut host = harness::spawn(backend).await;

    let session_id = host.new_session(1).await;
    host.request(
        2,
        "session/prompt",
        harness::text_prompt(
            &session_id,
            "First implement the parser, then refactor the reader, finally optimize the writer",
        ),
    )
    .await;
    let (seen, response) = host.recv_until_response(2).await;

    let kinds: Vec<_> = seen.iter().filter_map(harness::update_kind).collect();
    assert_eq!(kinds, vec!["plan", "agent_message_chunk"]);

    let entries = seen[0]["params"]["update"]["entries"]
        .as_array()
        .expect("entries");
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["status"], "in_progress");
    assert_eq!(entries[1]["status"], "pending");
    assert_eq!(response["result"]["stopReason"], "end_turn");
}
