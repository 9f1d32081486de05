//! Unit tests for JSON-RPC frame classification and builders.

use acp_bridge::rpc::message::{
    classify, error_frame, notification_frame, parse_error_frame, request_frame, response_frame,
    Inbound, RpcErrorObject, RpcId,
};
use serde_json::json;

#[test]
fn classifies_request() {
    let frame = json!({"jsonrpc":"2.0","id":1,"method":"initialize","params":{"a":1}});
    match classify(frame).expect("valid frame") {
        Inbound::Request { id, method, params } => {
            assert_eq!(id, RpcId::Number(1));
            assert_eq!(method, "initialize");
            assert_eq!(params, json!({"a":1}));
        }
        other => panic!("expected request, got {other:?}"),
    }
}

#[test]
fn classifies_string_id_request() {
    let frame = json!({"jsonrpc":"2.0","id":"abc","method":"m"});
    match classify(frame).expect("valid frame") {
        Inbound::Request { id, .. } => assert_eq!(id, RpcId::String("abc".into())),
        other => panic!("expected request, got {other:?}"),
    }
}

#[test]
fn classifies_notification() {
    let frame = json!({"jsonrpc":"2.0","method":"session/cancel","params":{"sessionId":"s"}});
    match classify(frame).expect("valid frame") {
        Inbound::Notification { method, .. } => assert_eq!(method, "session/cancel"),
        other => panic!("expected notification, got {other:?}"),
    }
}

#[test]
fn classifies_success_response() {
    let frame = json!({"jsonrpc":"2.0","id":7,"result":{"ok":true}});
    match classify(frame).expect("valid frame") {
        Inbound::Response { id, result, error } => {
            assert_eq!(id, RpcId::Number(7));
            assert_eq!(result, Some(json!({"ok":true})));
            assert!(error.is_none());
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[test]
fn classifies_error_response() {
    let frame = json!({"jsonrpc":"2.0","id":7,"error":{"code":-32001,"message":"nope"}});
    match classify(frame).expect("valid frame") {
        Inbound::Response { error, .. } => {
            let error = error.expect("error object");
            assert_eq!(error.code, -32001);
            assert_eq!(error.message, "nope");
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[test]
fn frame_without_method_or_id_is_invalid() {
    assert!(classify(json!({"jsonrpc":"2.0","params":{}})).is_err());
}

#[test]
fn null_id_counts_as_absent() {
    // A request with id null is treated as a notification per the
    // unknown-id parse-error convention.
    let frame = json!({"jsonrpc":"2.0","id":null,"method":"m"});
    assert!(matches!(
        classify(frame).expect("valid"),
        Inbound::Notification { .. }
    ));
}

#[test]
fn parse_error_frame_has_null_id_and_code() {
    let frame = parse_error_frame("bad json");
    assert_eq!(frame["id"], serde_json::Value::Null);
    assert_eq!(frame["error"]["code"], -32700);
}

#[test]
fn response_frame_echoes_id() {
    let frame = response_frame(&RpcId::String("x".into()), json!({"ok":true}));
    assert_eq!(frame["id"], "x");
    assert_eq!(frame["result"]["ok"], true);
    assert_eq!(frame["jsonrpc"], "2.0");
}

#[test]
fn error_frame_carries_code_and_message() {
    let frame = error_frame(
        Some(&RpcId::Number(3)),
        &RpcErrorObject {
            code: -32002,
            message: "Session busy: s".into(),
            data: None,
        },
    );
    assert_eq!(frame["id"], 3);
    assert_eq!(frame["error"]["code"], -32002);
    assert_eq!(frame["error"]["message"], "Session busy: s");
}

#[test]
fn outbound_builders_shape_frames() {
    let request = request_frame(9, "session/request_permission", json!({"a":1}));
    assert_eq!(request["id"], 9);
    assert_eq!(request["method"], "session/request_permission");

    let notification = notification_frame("session/update", json!({"b":2}));
    assert!(notification.get("id").is_none());
    assert_eq!(notification["method"], "session/update");
}
