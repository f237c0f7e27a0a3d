//! Command executor
//!
//! Maps a command's `type` tag to its handler and turns the outcome into a
//! [`Reply`]. Handler errors and panics never escape `execute`.

mod command;
mod handlers;
mod session;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use hbridge_protocol::{Reply, Value};
use tracing::{debug, warn};

use crate::host::{HostApplication, HostError};
use crate::script::{ScriptError, ScriptRuntime};

pub use command::{is_destructive, CommandKind, CommandView};
pub use handlers::{Handler, HandlerContext, DEFAULT_PARENT};
pub use session::SessionState;

/// Failure of a single command
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: expected {expected}, got {got}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
        got: &'static str,
    },

    #[error("Unknown command type: {0}")]
    UnknownCommand(String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("Script execution is not available")]
    ScriptUnavailable,

    #[error("Handler panicked: {message}")]
    Panic { message: String, trace: String },
}

impl CommandError {
    /// Trace attached to the reply, for failures that were not validation
    pub fn traceback(&self) -> Option<String> {
        match self {
            Self::Host(e) => e.trace().map(str::to_string),
            Self::Script(e) => Some(e.traceback.clone().unwrap_or_else(|| e.message.clone())),
            Self::Panic { trace, .. } => Some(trace.clone()),
            _ => None,
        }
    }

    pub fn into_reply(self) -> Reply {
        match self.traceback() {
            Some(trace) => Reply::failure_with_trace(self.to_string(), trace),
            None => Reply::failure(self.to_string()),
        }
    }
}

/// Executes commands against the host
pub struct CommandExecutor {
    host: Arc<dyn HostApplication>,
    scripts: Option<Arc<dyn ScriptRuntime>>,
    session: SessionState,
    handlers: HashMap<&'static str, Handler>,
}

impl CommandExecutor {
    /// Create an executor with every built-in handler and no script runtime
    pub fn new(host: Arc<dyn HostApplication>) -> Self {
        let handlers = CommandKind::ALL
            .into_iter()
            .map(|kind| (kind.tag(), handlers::handler_for(kind)))
            .collect();

        Self {
            host,
            scripts: None,
            session: SessionState::new(),
            handlers,
        }
    }

    /// Enable `execute_python` / `execute_script`
    pub fn with_script_runtime(mut self, runtime: Arc<dyn ScriptRuntime>) -> Self {
        self.scripts = Some(runtime);
        self
    }

    pub fn host(&self) -> &Arc<dyn HostApplication> {
        &self.host
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn has_script_runtime(&self) -> bool {
        self.scripts.is_some()
    }

    /// Command tags with a registered handler
    pub fn command_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Execute one command. Always returns exactly one reply.
    pub fn execute(&self, command: &Value) -> Reply {
        let tag = command.get("type").and_then(Value::as_str).unwrap_or("");

        match self.run(command) {
            Ok(data) => {
                debug!(command = tag, "Command succeeded");
                Reply::ok(data)
            }
            Err(e) => {
                warn!(command = tag, error = %e, "Command failed");
                e.into_reply()
            }
        }
    }

    fn run(&self, command: &Value) -> Result<Value, CommandError> {
        let view = CommandView::new(command)?;
        let tag = match view.require("type")? {
            Value::String(tag) => tag.as_str(),
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        };
        let handler = self
            .handlers
            .get(tag)
            .copied()
            .ok_or_else(|| CommandError::UnknownCommand(tag.to_string()))?;

        let ctx = HandlerContext {
            host: &self.host,
            session: &self.session,
            scripts: self.scripts.as_ref(),
        };

        panic::catch_unwind(AssertUnwindSafe(|| handler(&ctx, &view))).unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            Err(CommandError::Panic {
                trace: format!("panic in {} handler: {}", tag, message),
                message,
            })
        })
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
