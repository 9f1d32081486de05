//! Tool call classification, titles, locations, and diff synthesis.
//!
//! The backend reports tool calls as an opaque `{name, input}` pair. This
//! module turns that into everything the host-facing pipeline needs: a
//! [`ToolKind`], a human-readable title, the touched file locations, the
//! [`ToolOperation`] the permission broker classifies, and — for edits —
//! a synthesized diff content block.

use std::path::PathBuf;

use serde_json::Value;

use crate::permission::ToolOperation;
use crate::protocol::{ContentBlock, ToolCallLocation, ToolKind};

/// Input fields that carry file paths.
const PATH_FIELDS: &[&str] = &["file_path", "path", "target", "source", "destination"];

/// Classify a backend tool name into a [`ToolKind`].
///
/// Exact names are matched first, then name fragments. The table is
/// host-observable: editors group and render tool calls by the kind the
/// bridge reports.
#[must_use]
pub fn classify_tool(name: &str) -> ToolKind {
    let lower = name.to_lowercase();

    match lower.as_str() {
        "read" | "read_file" | "cat" | "open" | "view" => return ToolKind::Read,
        "edit" | "write" | "write_file" | "create_file" | "str_replace" | "apply_patch"
        | "patch" | "multi_edit" => return ToolKind::Edit,
        "delete" | "remove" | "unlink" | "rmdir" => return ToolKind::Delete,
        "move" | "rename" => return ToolKind::Move,
        "grep" | "search" | "find" | "glob" | "ls" | "list" => return ToolKind::Search,
        "bash" | "run" | "exec" | "shell" | "command" | "terminal" => return ToolKind::Execute,
        "think" | "reason" => return ToolKind::Think,
        "fetch" | "web_fetch" | "web_search" | "http_get" | "download" | "curl" => {
            return ToolKind::Fetch
        }
        _ => {}
    }

    // Fragment fallbacks, most specific first.
    if contains_any(&lower, &["grep", "search", "find", "glob"]) {
        ToolKind::Search
    } else if contains_any(&lower, &["bash", "run", "exec", "shell"]) {
        ToolKind::Execute
    } else if contains_any(&lower, &["delete", "remove"]) {
        ToolKind::Delete
    } else if contains_any(&lower, &["move", "rename"]) {
        ToolKind::Move
    } else if contains_any(&lower, &["edit", "write", "patch", "create"]) {
        ToolKind::Edit
    } else if contains_any(&lower, &["read", "view", "open"]) {
        ToolKind::Read
    } else if contains_any(&lower, &["think", "reason", "plan"]) {
        ToolKind::Think
    } else if contains_any(&lower, &["fetch", "web", "http"]) {
        ToolKind::Fetch
    } else {
        ToolKind::Other
    }
}

/// Derive the initial human-readable title for a tool call.
#[must_use]
pub fn derive_title(name: &str, kind: ToolKind, input: &Value) -> String {
    let path = first_path_field(input);
    let command = input.get("command").and_then(Value::as_str);

    match kind {
        ToolKind::Read => path.map_or_else(|| name.to_owned(), |p| format!("Read {p}")),
        ToolKind::Edit => path.map_or_else(|| name.to_owned(), |p| format!("Edit {p}")),
        ToolKind::Delete => path.map_or_else(|| name.to_owned(), |p| format!("Delete {p}")),
        ToolKind::Move => path.map_or_else(|| name.to_owned(), |p| format!("Move {p}")),
        ToolKind::Search => input
            .get("pattern")
            .or_else(|| input.get("query"))
            .and_then(Value::as_str)
            .map_or_else(|| name.to_owned(), |q| format!("Search for '{q}'")),
        ToolKind::Execute => {
            command.map_or_else(|| name.to_owned(), |c| format!("Run `{}`", truncate(c, 80)))
        }
        ToolKind::Fetch => input
            .get("url")
            .and_then(Value::as_str)
            .map_or_else(|| name.to_owned(), |u| format!("Fetch {u}")),
        ToolKind::Think | ToolKind::Other => name.to_owned(),
    }
}

/// Extract touched file locations from the tool input.
#[must_use]
pub fn extract_locations(input: &Value) -> Vec<ToolCallLocation> {
    let line = input
        .get("line")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok());

    extract_paths(input)
        .into_iter()
        .map(|path| ToolCallLocation {
            path: path.to_string_lossy().into_owned(),
            line,
        })
        .collect()
}

/// Extract every path-like field from the tool input.
#[must_use]
pub fn extract_paths(input: &Value) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for field in PATH_FIELDS {
        if let Some(value) = input.get(field).and_then(Value::as_str) {
            paths.push(PathBuf::from(value));
        }
    }
    if let Some(list) = input.get("paths").and_then(Value::as_array) {
        for value in list {
            if let Some(path) = value.as_str() {
                paths.push(PathBuf::from(path));
            }
        }
    }
    paths
}

/// Assemble the [`ToolOperation`] the permission broker classifies.
#[must_use]
pub fn build_operation(name: &str, input: &Value) -> ToolOperation {
    let op_type = classify_tool(name);
    let affected_paths = extract_paths(input);

    let mut danger_flags = Vec::new();
    if op_type == ToolKind::Delete {
        danger_flags.push("destructive operation".to_owned());
    }
    if op_type == ToolKind::Execute {
        if let Some(command) = input.get("command").and_then(Value::as_str) {
            if crate::permission::command_is_dangerous(command) {
                danger_flags.push(format!("dangerous command: {}", truncate(command, 60)));
            }
        }
    }

    ToolOperation {
        tool_name: name.to_owned(),
        inputs: input.clone(),
        affected_paths,
        op_type,
        danger_flags,
    }
}

/// Synthesize a diff content block from edit-shaped input.
///
/// Inputs carrying `old_string`/`new_string` describe an in-place edit;
/// inputs carrying `content` describe a file creation or rewrite. Anything
/// else yields no diff.
#[must_use]
pub fn synthesize_diff(input: &Value) -> Option<ContentBlock> {
    let path = first_path_field(input)?.to_owned();

    if let (Some(old), Some(new)) = (
        input.get("old_string").and_then(Value::as_str),
        input.get("new_string").and_then(Value::as_str),
    ) {
        return Some(ContentBlock::Diff {
            path,
            old_text: Some(old.to_owned()),
            new_text: new.to_owned(),
        });
    }

    if let Some(content) = input.get("content").and_then(Value::as_str) {
        return Some(ContentBlock::Diff {
            path,
            old_text: None,
            new_text: content.to_owned(),
        });
    }

    None
}

/// Content blocks for a completed tool call.
///
/// Prefers a synthesized diff from the recorded input; otherwise renders
/// the output as text when it has an obvious textual shape.
#[must_use]
pub fn result_content(input: &Value, output: &Value) -> Vec<ContentBlock> {
    if let Some(diff) = synthesize_diff(input) {
        return vec![diff];
    }

    let text = match output {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("output")
            .or_else(|| map.get("text"))
            .and_then(Value::as_str)
            .map(str::to_owned),
        _ => None,
    };

    text.map(|t| vec![ContentBlock::text(t)]).unwrap_or_default()
}

fn first_path_field(input: &Value) -> Option<&str> {
    PATH_FIELDS
        .iter()
        .find_map(|field| input.get(field).and_then(Value::as_str))
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_owned()
    } else {
        let prefix: String = text.chars().take(max).collect();
        format!("{prefix}\u{2026}")
    }
}
