//! Unit tests for permission classification: danger commands, path
//! containment, and option derivation.

use std::path::Path;

use acp_bridge::permission::{
    command_is_dangerous, lexically_contained, options_for, requires_confirmation, ToolOperation,
};
use acp_bridge::protocol::{PermissionOptionKind, ToolKind};
use serde_json::json;

fn op(op_type: ToolKind, inputs: serde_json::Value, paths: &[&str]) -> ToolOperation {
    ToolOperation {
        tool_name: "test".into(),
        inputs,
        affected_paths: paths.iter().map(std::path::PathBuf::from).collect(),
        op_type,
        danger_flags: Vec::new(),
    }
}

#[test]
fn delete_always_requires_confirmation() {
    let op = op(ToolKind::Delete, json!({}), &["/w/file.txt"]);
    assert!(requires_confirmation(&op, Path::new("/w")));
}

#[test]
fn plain_read_inside_workspace_does_not() {
    let op = op(ToolKind::Read, json!({"file_path":"/w/src/main.rs"}), &["/w/src/main.rs"]);
    assert!(!requires_confirmation(&op, Path::new("/w")));
}

#[test]
fn dangerous_command_tokens_are_detected() {
    for cmd in [
        "rm -rf build",
        "sudo apt install",
        "chmod 777 script.sh",
        "chown root file",
        "mv a b",
        "cp a b",
        "dd if=/dev/zero of=x",
        "echo hi && rm -rf /",
        "/usr/bin/sudo ls",
    ] {
        assert!(command_is_dangerous(cmd), "{cmd}");
    }
}

#[test]
fn benign_commands_pass() {
    for cmd in ["cargo build", "ls -la", "git status", "grep -r foo ."] {
        assert!(!command_is_dangerous(cmd), "{cmd}");
    }
}

#[test]
fn execute_with_dangerous_command_requires_confirmation() {
    let op = op(ToolKind::Execute, json!({"command":"rm -rf target"}), &[]);
    assert!(requires_confirmation(&op, Path::new("/w")));
}

#[test]
fn execute_with_benign_command_does_not() {
    let op = op(ToolKind::Execute, json!({"command":"cargo test"}), &[]);
    assert!(!requires_confirmation(&op, Path::new("/w")));
}

#[test]
fn absolute_path_outside_workspace_requires_confirmation() {
    let op = op(ToolKind::Edit, json!({}), &["/etc/passwd"]);
    assert!(requires_confirmation(&op, Path::new("/w")));
}

#[test]
fn relative_paths_are_not_flagged_by_containment() {
    let op = op(ToolKind::Edit, json!({}), &["src/lib.rs"]);
    assert!(!requires_confirmation(&op, Path::new("/w")));
}

#[test]
fn lexical_containment_normalizes_dot_segments() {
    let root = Path::new("/w");
    assert!(lexically_contained(root, Path::new("/w/a/b.txt")));
    assert!(lexically_contained(root, Path::new("/w/a/./b.txt")));
    assert!(lexically_contained(root, Path::new("/w/a/../c.txt")));
    assert!(!lexically_contained(root, Path::new("/w/../etc/passwd")));
    assert!(!lexically_contained(root, Path::new("/etc/passwd")));
}

#[test]
fn traversal_escaping_workspace_requires_confirmation() {
    let op = op(ToolKind::Edit, json!({}), &["/w/../outside.txt"]);
    assert!(requires_confirmation(&op, Path::new("/w")));
}

#[test]
fn delete_options_omit_allow_always() {
    let kinds: Vec<PermissionOptionKind> =
        options_for(ToolKind::Delete).iter().map(|o| o.kind).collect();
    assert_eq!(
        kinds,
        vec![
            PermissionOptionKind::AllowOnce,
            PermissionOptionKind::RejectOnce,
            PermissionOptionKind::RejectAlways,
        ]
    );
}

#[test]
fn non_delete_options_include_allow_always() {
    let kinds: Vec<PermissionOptionKind> =
        options_for(ToolKind::Execute).iter().map(|o| o.kind).collect();
    assert_eq!(
        kinds,
        vec![
            PermissionOptionKind::AllowOnce,
            PermissionOptionKind::AllowAlways,
            PermissionOptionKind::RejectOnce,
            PermissionOptionKind::RejectAlways,
        ]
    );
}

#[test]
fn option_ids_match_their_kinds() {
    for option in options_for(ToolKind::Edit) {
        let expected = match option.kind {
            PermissionOptionKind::AllowOnce => "allow_once",
            PermissionOptionKind::AllowAlways => "allow_always",
            PermissionOptionKind::RejectOnce => "reject_once",
            PermissionOptionKind::RejectAlways => "reject_always",
        };
        assert_eq!(option.option_id, expected);
    }
}
