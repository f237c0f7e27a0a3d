//! Per-command handlers
//!
//! Each handler validates its fields, performs one host operation and returns
//! the reply payload.

use std::path::Path;
use std::sync::Arc;

use hbridge_protocol::Value;
use tracing::debug;

use super::command::{CommandKind, CommandView};
use super::session::SessionState;
use super::CommandError;
use crate::host::{HostApplication, HostError};
use crate::script::{ScriptRuntime, ScriptScope};

/// Default parent for `create_node`
pub const DEFAULT_PARENT: &str = "/obj";

/// State available to a handler
pub struct HandlerContext<'a> {
    pub host: &'a Arc<dyn HostApplication>,
    pub session: &'a SessionState,
    pub scripts: Option<&'a Arc<dyn ScriptRuntime>>,
}

pub type Handler = fn(&HandlerContext<'_>, &CommandView<'_>) -> Result<Value, CommandError>;

/// Handler implementing `kind`
pub fn handler_for(kind: CommandKind) -> Handler {
    match kind {
        CommandKind::CreateNode => create_node,
        CommandKind::DeleteNode => delete_node,
        CommandKind::SetParameter => set_parameter,
        CommandKind::GetParameter => get_parameter,
        CommandKind::GetSelection => get_selection,
        CommandKind::SelectNodes => select_nodes,
        CommandKind::GetNodeInfo => get_node_info,
        CommandKind::ExecutePython | CommandKind::ExecuteScript => execute_script,
        CommandKind::SaveScene => save_scene,
        CommandKind::LoadScene => load_scene,
        CommandKind::GetSessionState => get_session_state,
        CommandKind::SetSessionState => set_session_state,
    }
}

fn path_value(path: &Path) -> Value {
    Value::from(path.display().to_string())
}

fn paths_value(paths: Vec<String>) -> Value {
    paths.into_iter().map(Value::from).collect()
}

// ==================== Nodes ====================

fn create_node(ctx: &HandlerContext<'_>, cmd: &CommandView<'_>) -> Result<Value, CommandError> {
    let node_type = cmd.require_str("node_type")?;
    let parent = cmd.opt_str("parent")?.unwrap_or(DEFAULT_PARENT);
    let name = cmd.opt_str("name")?;
    let parameters = cmd.opt_map("parameters")?;

    let node = ctx.host.create_node(parent, node_type, name)?;

    if let Some(parameters) = parameters {
        for (parameter, value) in parameters {
            match ctx.host.set_parameter(&node.path, parameter, value) {
                Ok(()) => {}
                Err(HostError::ParameterNotFound { .. }) => {
                    debug!(node = %node.path, parameter = %parameter, "Skipping unknown parameter");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(Value::map([
        ("node_path", node.path),
        ("node_type", node.node_type),
        ("name", node.name),
    ]))
}

fn delete_node(ctx: &HandlerContext<'_>, cmd: &CommandView<'_>) -> Result<Value, CommandError> {
    let path = cmd.require_str("node_path")?;
    ctx.host.delete_node(path)?;
    Ok(Value::map([("deleted", path)]))
}

fn set_parameter(ctx: &HandlerContext<'_>, cmd: &CommandView<'_>) -> Result<Value, CommandError> {
    let path = cmd.require_str("node_path")?;
    let parameter = cmd.require_str("parameter")?;
    let value = cmd.require("value")?;

    ctx.host.set_parameter(path, parameter, value)?;

    Ok(Value::map([
        ("node_path", Value::from(path)),
        ("parameter", Value::from(parameter)),
        ("value", value.clone()),
    ]))
}

fn get_parameter(ctx: &HandlerContext<'_>, cmd: &CommandView<'_>) -> Result<Value, CommandError> {
    let path = cmd.require_str("node_path")?;
    let parameter = cmd.require_str("parameter")?;

    let value = ctx.host.get_parameter(path, parameter)?;

    Ok(Value::map([
        ("node_path", Value::from(path)),
        ("parameter", Value::from(parameter)),
        ("value", value),
    ]))
}

fn get_node_info(ctx: &HandlerContext<'_>, cmd: &CommandView<'_>) -> Result<Value, CommandError> {
    let path = cmd.require_str("node_path")?;
    Ok(ctx.host.node_info(path)?.to_value())
}

// ==================== Selection ====================

fn get_selection(ctx: &HandlerContext<'_>, _cmd: &CommandView<'_>) -> Result<Value, CommandError> {
    let selection = ctx.host.selected_nodes();
    let count = selection.len();
    Ok(Value::map([
        ("selection", paths_value(selection)),
        ("count", Value::from(count)),
    ]))
}

fn select_nodes(ctx: &HandlerContext<'_>, cmd: &CommandView<'_>) -> Result<Value, CommandError> {
    let requested = cmd.str_list("nodes")?;
    let selected = ctx.host.select_nodes(&requested);
    let count = selected.len();
    Ok(Value::map([
        ("selected", paths_value(selected)),
        ("count", Value::from(count)),
    ]))
}

// ==================== Scripts ====================

fn execute_script(ctx: &HandlerContext<'_>, cmd: &CommandView<'_>) -> Result<Value, CommandError> {
    let code = cmd.require_str("code")?;
    let runtime = ctx.scripts.ok_or(CommandError::ScriptUnavailable)?;

    debug!(runtime = runtime.name(), lines = code.lines().count(), "Running script");

    // The session lock is not held while the script runs
    let before = ctx.session.snapshot();
    let mut session = before.clone();
    let result = runtime.run(
        code,
        ScriptScope {
            host: Arc::clone(ctx.host),
            session: &mut session,
        },
    )?;
    let changed = ctx.session.merge_changes(&before, session);
    debug!(changed, "Script session changes written back");

    Ok(Value::map([("result", result)]))
}

// ==================== Scene files ====================

fn save_scene(ctx: &HandlerContext<'_>, cmd: &CommandView<'_>) -> Result<Value, CommandError> {
    let target = cmd.opt_str("filepath")?.map(Path::new);
    let saved = ctx.host.save_scene(target)?;
    Ok(Value::map([("filepath", path_value(&saved))]))
}

fn load_scene(ctx: &HandlerContext<'_>, cmd: &CommandView<'_>) -> Result<Value, CommandError> {
    let source = cmd.require_str("filepath")?;
    let loaded = ctx.host.load_scene(Path::new(source))?;
    Ok(Value::map([("filepath", path_value(&loaded))]))
}

// ==================== Session state ====================

fn get_session_state(
    ctx: &HandlerContext<'_>,
    cmd: &CommandView<'_>,
) -> Result<Value, CommandError> {
    match cmd.opt_str("key")? {
        Some(key) if !key.is_empty() => {
            let value = ctx.session.get(key).unwrap_or_default();
            Ok(Value::map([("key", Value::from(key)), ("value", value)]))
        }
        _ => Ok(Value::map([("state", Value::Map(ctx.session.snapshot()))])),
    }
}

fn set_session_state(
    ctx: &HandlerContext<'_>,
    cmd: &CommandView<'_>,
) -> Result<Value, CommandError> {
    let key = cmd.require_str("key")?;
    let value = cmd.get("value").cloned().unwrap_or_default();

    ctx.session.set(key, value.clone());

    Ok(Value::map([("key", Value::from(key)), ("value", value)]))
}
