//! Envelope and reply types exchanged with automation clients

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::value::{Map, Value};

/// Error text returned when the operator declines a command
pub const CANCELLED_BY_USER: &str = "Command cancelled by user";

/// Process-wide safety mode deciding which commands need confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Only destructive commands are confirmed
    #[default]
    Auto,
    /// Every command is confirmed
    Preview,
    /// Destructive commands are confirmed, everything else runs
    Destructive,
}

impl ApprovalMode {
    pub const ALL: [ApprovalMode; 3] = [
        ApprovalMode::Auto,
        ApprovalMode::Preview,
        ApprovalMode::Destructive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalMode::Auto => "auto",
            ApprovalMode::Preview => "preview",
            ApprovalMode::Destructive => "destructive",
        }
    }
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected approval mode string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid approval mode: {0}")]
pub struct InvalidApprovalMode(pub String);

impl FromStr for ApprovalMode {
    type Err = InvalidApprovalMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApprovalMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| InvalidApprovalMode(s.to_string()))
    }
}

/// Result of one command or envelope.
///
/// Absent optional fields are omitted from the encoded map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl Reply {
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error: None,
            traceback: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            traceback: None,
        }
    }

    pub fn failure_with_trace(error: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self {
            traceback: Some(traceback.into()),
            ..Self::failure(error)
        }
    }

    /// Reply for a command the operator declined
    pub fn cancelled() -> Self {
        Self::failure(CANCELLED_BY_USER)
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl From<Reply> for Value {
    fn from(reply: Reply) -> Self {
        let mut map = Map::new();
        map.insert("success".into(), Value::Bool(reply.success));
        if let Some(data) = reply.data {
            map.insert("data".into(), data);
        }
        if let Some(error) = reply.error {
            map.insert("error".into(), Value::String(error));
        }
        if let Some(traceback) = reply.traceback {
            map.insert("traceback".into(), Value::String(traceback));
        }
        Value::Map(map)
    }
}

/// Envelope kinds understood by the dispatcher
pub mod message_type {
    pub const COMMAND: &str = "command";
    pub const BATCH: &str = "batch";
    pub const SET_APPROVAL_MODE: &str = "set_approval_mode";
    pub const PING: &str = "ping";
}

/// A classified incoming envelope, borrowing from the decoded message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Envelope<'a> {
    Command(Option<&'a Value>),
    Batch(Option<&'a Value>),
    SetApprovalMode(Option<&'a Value>),
    Ping,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Invalid message: expected a map envelope")]
    NotAMap,

    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

impl<'a> Envelope<'a> {
    /// Classify a decoded message by its `type` field
    pub fn parse(message: &'a Value) -> Result<Self, EnvelopeError> {
        if message.as_map().is_none() {
            return Err(EnvelopeError::NotAMap);
        }

        let data = message.get("data");
        match message.get("type") {
            Some(Value::String(kind)) => match kind.as_str() {
                message_type::COMMAND => Ok(Envelope::Command(data)),
                message_type::BATCH => Ok(Envelope::Batch(data)),
                message_type::SET_APPROVAL_MODE => Ok(Envelope::SetApprovalMode(data)),
                message_type::PING => Ok(Envelope::Ping),
                other => Err(EnvelopeError::UnknownType(other.to_string())),
            },
            Some(other) => Err(EnvelopeError::UnknownType(other.to_string())),
            None => Err(EnvelopeError::UnknownType(Value::Nil.to_string())),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Envelope::Command(_) => message_type::COMMAND,
            Envelope::Batch(_) => message_type::BATCH,
            Envelope::SetApprovalMode(_) => message_type::SET_APPROVAL_MODE,
            Envelope::Ping => message_type::PING,
        }
    }
}
