//! Host application capability surface
//!
//! The bridge never talks to the host's scene graph directly. Everything the
//! command handlers and the script runtime can do to the live document goes
//! through [`HostApplication`], which the embedding application implements.

mod memory;

use std::path::{Path, PathBuf};

use hbridge_protocol::{Map, Value};

pub use memory::InMemoryHost;

/// Errors reported by the host application
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Parent node not found: {0}")]
    ParentNotFound(String),

    #[error("Parameter not found: {parameter}")]
    ParameterNotFound { node: String, parameter: String },

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Failed to read scene {path}: {source}")]
    SceneRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write scene {path}: {source}")]
    SceneWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid scene file {path}: {message}")]
    SceneFormat { path: PathBuf, message: String },

    /// Host-side failure with an optional host-provided trace
    #[error("{message}")]
    Operation {
        message: String,
        trace: Option<String>,
    },
}

impl HostError {
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
            trace: None,
        }
    }

    /// Trace captured by the host, if any
    pub fn trace(&self) -> Option<&str> {
        match self {
            Self::Operation { trace, .. } => trace.as_deref(),
            _ => None,
        }
    }
}

/// Handle to a node returned by creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub path: String,
    pub name: String,
    pub node_type: String,
}

/// One parameter as reported by node introspection
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub name: String,
    pub label: String,
    /// Template type name, e.g. `Float`, `Int`, `Toggle`, `String`
    pub kind: String,
    pub value: Value,
}

/// Node introspection result
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub path: String,
    pub name: String,
    pub node_type: String,
    pub type_description: String,
    pub position: [f64; 2],
    pub parameters: Vec<ParameterInfo>,
}

impl NodeInfo {
    /// Reply payload shape for `get_node_info`
    pub fn to_value(&self) -> Value {
        let parameters: Map = self
            .parameters
            .iter()
            .map(|parm| {
                let entry = Value::map([
                    ("value", parm.value.clone()),
                    ("label", Value::from(parm.label.as_str())),
                    ("type", Value::from(parm.kind.as_str())),
                ]);
                (parm.name.clone(), entry)
            })
            .collect();

        Value::map([
            ("path", Value::from(self.path.as_str())),
            ("name", Value::from(self.name.as_str())),
            ("type", Value::from(self.node_type.as_str())),
            ("type_description", Value::from(self.type_description.as_str())),
            (
                "position",
                Value::Array(vec![
                    Value::Float(self.position[0]),
                    Value::Float(self.position[1]),
                ]),
            ),
            ("parameters", Value::Map(parameters)),
        ])
    }
}

/// Operations the bridge may perform on the host document.
///
/// Implementations must be callable from the bridge worker threads.
pub trait HostApplication: Send + Sync {
    /// Create a node of `node_type` under `parent`. A missing `name` lets the
    /// host pick one.
    fn create_node(
        &self,
        parent: &str,
        node_type: &str,
        name: Option<&str>,
    ) -> Result<NodeRef, HostError>;

    /// Delete a node and everything below it
    fn delete_node(&self, path: &str) -> Result<(), HostError>;

    fn get_parameter(&self, path: &str, parameter: &str) -> Result<Value, HostError>;

    fn set_parameter(&self, path: &str, parameter: &str, value: &Value) -> Result<(), HostError>;

    /// Paths of the currently selected nodes, in selection order
    fn selected_nodes(&self) -> Vec<String>;

    /// Replace the selection. Unknown paths are skipped; returns what was
    /// actually selected.
    fn select_nodes(&self, paths: &[String]) -> Vec<String>;

    fn node_info(&self, path: &str) -> Result<NodeInfo, HostError>;

    /// Save the document, optionally under a new path. Returns the path
    /// written.
    fn save_scene(&self, path: Option<&Path>) -> Result<PathBuf, HostError>;

    /// Replace the document with the one at `path`
    fn load_scene(&self, path: &Path) -> Result<PathBuf, HostError>;
}
