//! Message dispatcher
//!
//! Decodes one wire message, classifies the envelope, runs the approval gate
//! and assembles the reply. Every message produces exactly one reply, even
//! when decoding fails or a handler panics.

mod preview;

use std::panic::{self, AssertUnwindSafe};

use hbridge_protocol::{
    codec, message_type, ApprovalMode, Envelope, InvalidApprovalMode, Reply, Value,
    MAX_MESSAGE_SIZE,
};
use tracing::{debug, error, info, warn};

use crate::approval::{ApprovalManager, BatchItem};
use crate::executor::{is_destructive, panic_message, CommandExecutor};

pub use preview::{describe, preview};

/// Routes decoded messages to the approval gate and the executor
pub struct MessageDispatcher {
    executor: CommandExecutor,
    approval: ApprovalManager,
    max_message_size: usize,
}

impl MessageDispatcher {
    pub fn new(executor: CommandExecutor, approval: ApprovalManager) -> Self {
        Self {
            executor,
            approval,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Limit applied to incoming and outgoing payloads
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub fn approval(&self) -> &ApprovalManager {
        &self.approval
    }

    /// Handle one binary frame and return the encoded reply
    pub fn handle_binary(&self, bytes: &[u8]) -> Vec<u8> {
        let reply = panic::catch_unwind(AssertUnwindSafe(|| {
            match codec::decode_with_limit::<Value>(bytes, self.max_message_size) {
                Ok(message) => self.handle_message(&message),
                Err(e) => {
                    warn!(len = bytes.len(), error = %e, "Failed to decode message");
                    Reply::failure(e.to_string())
                }
            }
        }))
        .unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "Dispatch panicked");
            Reply::failure(format!("Internal error: {}", message))
        });

        self.encode_reply(&reply)
    }

    fn encode_reply(&self, reply: &Reply) -> Vec<u8> {
        match codec::encode_with_limit(reply, self.max_message_size) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode reply");
                codec::encode(&Reply::failure(e.to_string())).unwrap_or_else(|e| {
                    error!(error = %e, "Failed to encode error reply");
                    Vec::new()
                })
            }
        }
    }

    /// Handle an already decoded message
    pub fn handle_message(&self, message: &Value) -> Reply {
        let envelope = match Envelope::parse(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Rejected message");
                return Reply::failure(e.to_string());
            }
        };

        debug!(message_type = envelope.type_name(), "Dispatching message");

        match envelope {
            Envelope::Ping => Reply::ok(Value::map([("pong", true)])),
            Envelope::SetApprovalMode(data) => self.handle_set_approval_mode(data),
            Envelope::Command(data) => self.handle_command(data.unwrap_or(&Value::Nil)),
            Envelope::Batch(data) => self.handle_batch(data),
        }
    }

    fn handle_set_approval_mode(&self, data: Option<&Value>) -> Reply {
        let requested = data.and_then(|d| d.get("mode")).unwrap_or(&Value::Nil);
        let parsed = match requested {
            Value::String(s) => s.parse::<ApprovalMode>(),
            other => Err(InvalidApprovalMode(other.to_string())),
        };

        match parsed {
            Ok(mode) => {
                self.approval.set_mode(mode);
                Reply::ok(Value::map([("mode", mode.as_str())]))
            }
            Err(e) => {
                warn!(error = %e, "Rejected approval mode");
                Reply::failure(e.to_string())
            }
        }
    }

    fn handle_command(&self, command: &Value) -> Reply {
        let destructive = is_destructive(command);
        let tag = command.get("type").and_then(Value::as_str).unwrap_or("");

        let approved = !self.approval.requires_approval(destructive)
            || self
                .approval
                .request_approval(&describe(command), &preview(command), destructive);

        info!(
            message_type = message_type::COMMAND,
            command = tag,
            destructive,
            approved,
            "Command dispatched"
        );

        if approved {
            self.executor.execute(command)
        } else {
            Reply::cancelled()
        }
    }

    fn handle_batch(&self, data: Option<&Value>) -> Reply {
        let commands = match data.and_then(|d| d.get("commands")) {
            None | Some(Value::Nil) => &[][..],
            Some(Value::Array(items)) => items.as_slice(),
            Some(other) => {
                return Reply::failure(format!(
                    "Invalid field commands: expected array, got {}",
                    other.kind()
                ))
            }
        };

        let items: Vec<BatchItem> = commands
            .iter()
            .map(|command| BatchItem {
                description: describe(command),
                preview: preview(command),
                is_destructive: is_destructive(command),
            })
            .collect();

        let approvals = self.approval.approve_batch(&items);
        info!(
            message_type = message_type::BATCH,
            count = commands.len(),
            approved = approvals.iter().filter(|a| **a).count(),
            "Batch dispatched"
        );

        let results: Vec<Value> = commands
            .iter()
            .zip(approvals)
            .map(|(command, approved)| {
                if approved {
                    self.executor.execute(command)
                } else {
                    Reply::cancelled()
                }
            })
            .map(Value::from)
            .collect();

        Reply::ok(Value::map([("results", Value::Array(results))]))
    }
}
