//! Script execution for `execute_python` / `execute_script`
//!
//! Scripts are always treated as destructive by the dispatcher. The runtime
//! sees the host and the executor's session state, and reports the value of
//! the global `result` when the snippet finishes.

mod lua;

use std::sync::Arc;

use hbridge_protocol::{Map, Value};

use crate::host::HostApplication;

pub use lua::LuaRuntime;

/// Script failure, with the interpreter's traceback when it has one
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
    pub traceback: Option<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            traceback: None,
        }
    }
}

/// What a script can reach while it runs
pub struct ScriptScope<'a> {
    pub host: Arc<dyn HostApplication>,
    /// Session state, written back after a successful run
    pub session: &'a mut Map,
}

/// An embedded interpreter
pub trait ScriptRuntime: Send + Sync {
    /// Interpreter name for logs
    fn name(&self) -> &str;

    /// Run `code` and return the value of its global `result` (nil if unset)
    fn run(&self, code: &str, scope: ScriptScope<'_>) -> Result<Value, ScriptError>;
}
