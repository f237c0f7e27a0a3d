//! Human-readable descriptions and previews of commands

use hbridge_protocol::Value;

use crate::executor::{CommandKind, DEFAULT_PARENT};

const DEFAULT_NODE_NAME: &str = "new_node";
const PREVIEW_CODE_LINES: usize = 5;

fn field(command: &Value, name: &str) -> String {
    command.get(name).unwrap_or(&Value::Nil).to_string()
}

fn field_or(command: &Value, name: &str, default: &str) -> String {
    match command.get(name) {
        None | Some(Value::Nil) => default.to_string(),
        Some(value) => value.to_string(),
    }
}

fn kind(command: &Value) -> Option<CommandKind> {
    command
        .get("type")
        .and_then(Value::as_str)
        .and_then(CommandKind::from_tag)
}

/// One-line summary, used in batch listings and prompt headers
pub fn describe(command: &Value) -> String {
    match kind(command) {
        Some(CommandKind::CreateNode) => format!("Create {} node", field(command, "node_type")),
        Some(CommandKind::DeleteNode) => format!("Delete node: {}", field(command, "node_path")),
        Some(CommandKind::SetParameter) => format!(
            "Set {} on {}",
            field(command, "parameter"),
            field(command, "node_path")
        ),
        Some(kind) if kind.is_script() => "Execute script".to_string(),
        _ => field(command, "type"),
    }
}

/// What executing the command will do
pub fn preview(command: &Value) -> String {
    match kind(command) {
        Some(CommandKind::CreateNode) => format!(
            "Will create: {}/{} ({})",
            field_or(command, "parent", DEFAULT_PARENT),
            field_or(command, "name", DEFAULT_NODE_NAME),
            field(command, "node_type")
        ),
        Some(CommandKind::DeleteNode) => format!("Will delete: {}", field(command, "node_path")),
        Some(CommandKind::SetParameter) => format!(
            "Will set {}.{} = {}",
            field(command, "node_path"),
            field(command, "parameter"),
            field(command, "value")
        ),
        Some(kind) if kind.is_script() => {
            let code = field_or(command, "code", "");
            format!("Will execute:\n{}", code_excerpt(&code))
        }
        _ => format!("Will execute: {}", field(command, "type")),
    }
}

/// First lines of a snippet, with a count of what was cut
fn code_excerpt(code: &str) -> String {
    let lines: Vec<&str> = code.split('\n').collect();
    let mut excerpt = lines
        .iter()
        .take(PREVIEW_CODE_LINES)
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    if lines.len() > PREVIEW_CODE_LINES {
        excerpt.push_str(&format!(
            "\n... ({} more lines)",
            lines.len() - PREVIEW_CODE_LINES
        ));
    }
    excerpt
}
