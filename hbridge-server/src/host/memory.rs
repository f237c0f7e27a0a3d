//! In-process scene graph implementing [`HostApplication`]
//!
//! Backs the standalone `hbridge` binary and the test suites. Nodes live in a
//! path-keyed map; scenes are saved as JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hbridge_protocol::Value;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{HostApplication, HostError, NodeInfo, NodeRef, ParameterInfo};

/// Scene path used until the first explicit save or load
pub const DEFAULT_SCENE_PATH: &str = "untitled.hip";

/// Fixed top-level containers, never deletable
const MANAGERS: &[(&str, &str)] = &[
    ("obj", "Objects"),
    ("out", "Outputs"),
    ("stage", "Stage"),
    ("mat", "Materials"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum ParmKind {
    Float,
    Int,
    Toggle,
    String,
}

impl ParmKind {
    fn name(self) -> &'static str {
        match self {
            ParmKind::Float => "Float",
            ParmKind::Int => "Int",
            ParmKind::Toggle => "Toggle",
            ParmKind::String => "String",
        }
    }

    /// Coerce an incoming value to this parameter's storage type
    fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ParmKind::Float, Value::Float(_)) => Some(value.clone()),
            (ParmKind::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (ParmKind::Int, Value::Int(_)) => Some(value.clone()),
            (ParmKind::Int, Value::Float(f)) if f.fract() == 0.0 => Some(Value::Int(*f as i64)),
            (ParmKind::Toggle, Value::Bool(_)) => Some(value.clone()),
            (ParmKind::Toggle, Value::Int(i @ (0 | 1))) => Some(Value::Bool(*i == 1)),
            (ParmKind::String, Value::String(_)) => Some(value.clone()),
            _ => None,
        }
    }
}

struct ParmTemplate {
    name: &'static str,
    label: &'static str,
    kind: ParmKind,
    default: fn() -> Value,
}

const fn parm(
    name: &'static str,
    label: &'static str,
    kind: ParmKind,
    default: fn() -> Value,
) -> ParmTemplate {
    ParmTemplate {
        name,
        label,
        kind,
        default,
    }
}

fn zero() -> Value {
    Value::Float(0.0)
}

fn one() -> Value {
    Value::Float(1.0)
}

fn on() -> Value {
    Value::Bool(true)
}

const TRANSFORM: &[ParmTemplate] = &[
    parm("tx", "Translate X", ParmKind::Float, zero),
    parm("ty", "Translate Y", ParmKind::Float, zero),
    parm("tz", "Translate Z", ParmKind::Float, zero),
    parm("rx", "Rotate X", ParmKind::Float, zero),
    parm("ry", "Rotate Y", ParmKind::Float, zero),
    parm("rz", "Rotate Z", ParmKind::Float, zero),
    parm("scale", "Uniform Scale", ParmKind::Float, one),
    parm("display", "Display", ParmKind::Toggle, on),
];

const CAMERA: &[ParmTemplate] = &[
    parm("resx", "Resolution X", ParmKind::Int, || Value::Int(1920)),
    parm("resy", "Resolution Y", ParmKind::Int, || Value::Int(1080)),
    parm("focal", "Focal Length", ParmKind::Float, || Value::Float(50.0)),
];

const BOX: &[ParmTemplate] = &[
    parm("type", "Primitive Type", ParmKind::String, || Value::from("polygon")),
    parm("sizex", "Size X", ParmKind::Float, one),
    parm("sizey", "Size Y", ParmKind::Float, one),
    parm("sizez", "Size Z", ParmKind::Float, one),
];

const SPHERE: &[ParmTemplate] = &[
    parm("type", "Primitive Type", ParmKind::String, || Value::from("polygon")),
    parm("rad", "Radius", ParmKind::Float, one),
    parm("rows", "Rows", ParmKind::Int, || Value::Int(13)),
    parm("cols", "Columns", ParmKind::Int, || Value::Int(24)),
];

struct NodeType {
    name: &'static str,
    description: &'static str,
    parameters: &'static [&'static [ParmTemplate]],
}

const NODE_TYPES: &[NodeType] = &[
    NodeType {
        name: "geo",
        description: "Geometry",
        parameters: &[TRANSFORM],
    },
    NodeType {
        name: "null",
        description: "Null",
        parameters: &[TRANSFORM],
    },
    NodeType {
        name: "cam",
        description: "Camera",
        parameters: &[TRANSFORM, CAMERA],
    },
    NodeType {
        name: "subnet",
        description: "Subnetwork",
        parameters: &[TRANSFORM],
    },
    NodeType {
        name: "box",
        description: "Box",
        parameters: &[BOX],
    },
    NodeType {
        name: "sphere",
        description: "Sphere",
        parameters: &[SPHERE],
    },
];

fn lookup_type(name: &str) -> Option<&'static NodeType> {
    NODE_TYPES.iter().find(|t| t.name == name)
}

fn type_description(name: &str) -> String {
    if let Some(t) = lookup_type(name) {
        return t.description.to_string();
    }
    MANAGERS
        .iter()
        .find(|(manager, _)| *manager == name)
        .map(|(_, description)| description.to_string())
        .unwrap_or_else(|| name.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Parameter {
    label: String,
    kind: ParmKind,
    value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    name: String,
    node_type: String,
    position: [f64; 2],
    parameters: BTreeMap<String, Parameter>,
}

impl Node {
    fn container(name: &str, node_type: &str) -> Self {
        Self {
            name: name.to_string(),
            node_type: node_type.to_string(),
            position: [0.0, 0.0],
            parameters: BTreeMap::new(),
        }
    }
}

/// Serialized document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Scene {
    nodes: BTreeMap<String, Node>,
    #[serde(default)]
    selection: Vec<String>,
}

impl Scene {
    fn new() -> Self {
        let mut scene = Self::default();
        scene.ensure_managers();
        scene
    }

    fn ensure_managers(&mut self) {
        self.nodes
            .entry("/".to_string())
            .or_insert_with(|| Node::container("", "root"));
        for (manager, _) in MANAGERS {
            self.nodes
                .entry(format!("/{}", manager))
                .or_insert_with(|| Node::container(manager, manager));
        }
    }

    fn child_path(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", parent, name)
        }
    }

    fn children_of<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.nodes.keys().filter(move |path| {
            path.as_str() != parent
                && path
                    .rsplit_once('/')
                    .map(|(dir, _)| if dir.is_empty() { "/" } else { dir })
                    == Some(parent)
        })
    }

    /// First free name under `parent`, starting from `base` or `base1`
    fn unique_name(&self, parent: &str, base: &str, numbered: bool) -> String {
        if !numbered && !self.nodes.contains_key(&Self::child_path(parent, base)) {
            return base.to_string();
        }
        let stem = base.trim_end_matches(|c: char| c.is_ascii_digit());
        let stem = if stem.is_empty() { base } else { stem };
        (1u32..)
            .map(|n| format!("{}{}", stem, n))
            .find(|candidate| !self.nodes.contains_key(&Self::child_path(parent, candidate)))
            .unwrap_or_else(|| base.to_string())
    }

    fn node(&self, path: &str) -> Result<&Node, HostError> {
        self.nodes
            .get(path)
            .ok_or_else(|| HostError::NodeNotFound(path.to_string()))
    }

    fn is_subtree(path: &str, root: &str) -> bool {
        path == root
            || path
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

struct HostState {
    scene: Scene,
    scene_path: PathBuf,
}

/// Scene graph held entirely in memory
pub struct InMemoryHost {
    state: RwLock<HostState>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HostState {
                scene: Scene::new(),
                scene_path: PathBuf::from(DEFAULT_SCENE_PATH),
            }),
        }
    }

    /// Current document path
    pub fn scene_path(&self) -> PathBuf {
        self.state.read().scene_path.clone()
    }

    pub fn node_exists(&self, path: &str) -> bool {
        self.state.read().scene.nodes.contains_key(path)
    }

    pub fn node_count(&self) -> usize {
        self.state.read().scene.nodes.len()
    }

    /// Names of the node types this host can create
    pub fn node_types() -> impl Iterator<Item = &'static str> {
        NODE_TYPES.iter().map(|t| t.name)
    }
}

impl Default for InMemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_name(name: &str) -> Result<(), HostError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(HostError::InvalidValue(format!("Invalid node name: {:?}", name)))
    }
}

impl HostApplication for InMemoryHost {
    fn create_node(
        &self,
        parent: &str,
        node_type: &str,
        name: Option<&str>,
    ) -> Result<NodeRef, HostError> {
        let template =
            lookup_type(node_type).ok_or_else(|| HostError::UnknownNodeType(node_type.to_string()))?;
        if let Some(name) = name {
            validate_name(name)?;
        }

        let mut state = self.state.write();
        let scene = &mut state.scene;

        if !scene.nodes.contains_key(parent) || parent == "/" {
            return Err(HostError::ParentNotFound(parent.to_string()));
        }

        let name = match name {
            Some(name) => scene.unique_name(parent, name, false),
            None => scene.unique_name(parent, node_type, true),
        };
        let path = Scene::child_path(parent, &name);
        let siblings = scene.children_of(parent).count();

        let parameters = template
            .parameters
            .iter()
            .flat_map(|group| group.iter())
            .map(|t| {
                (
                    t.name.to_string(),
                    Parameter {
                        label: t.label.to_string(),
                        kind: t.kind,
                        value: (t.default)(),
                    },
                )
            })
            .collect();

        scene.nodes.insert(
            path.clone(),
            Node {
                name: name.clone(),
                node_type: node_type.to_string(),
                position: [0.0, -(siblings as f64)],
                parameters,
            },
        );

        debug!(path = %path, node_type, "Created node");

        Ok(NodeRef {
            path,
            name,
            node_type: node_type.to_string(),
        })
    }

    fn delete_node(&self, path: &str) -> Result<(), HostError> {
        let mut state = self.state.write();
        let scene = &mut state.scene;

        scene.node(path)?;
        if path == "/" || MANAGERS.iter().any(|(m, _)| path.strip_prefix('/') == Some(*m)) {
            return Err(HostError::operation(format!(
                "Cannot delete manager node: {}",
                path
            )));
        }

        scene.nodes.retain(|p, _| !Scene::is_subtree(p, path));
        scene.selection.retain(|p| !Scene::is_subtree(p, path));

        debug!(path, "Deleted node");
        Ok(())
    }

    fn get_parameter(&self, path: &str, parameter: &str) -> Result<Value, HostError> {
        let state = self.state.read();
        let node = state.scene.node(path)?;
        node.parameters
            .get(parameter)
            .map(|p| p.value.clone())
            .ok_or_else(|| HostError::ParameterNotFound {
                node: path.to_string(),
                parameter: parameter.to_string(),
            })
    }

    fn set_parameter(&self, path: &str, parameter: &str, value: &Value) -> Result<(), HostError> {
        let mut state = self.state.write();
        let node = state
            .scene
            .nodes
            .get_mut(path)
            .ok_or_else(|| HostError::NodeNotFound(path.to_string()))?;
        let parm = node
            .parameters
            .get_mut(parameter)
            .ok_or_else(|| HostError::ParameterNotFound {
                node: path.to_string(),
                parameter: parameter.to_string(),
            })?;

        parm.value = parm.kind.coerce(value).ok_or_else(|| {
            HostError::InvalidValue(format!(
                "Parameter {} expects {}, got {}",
                parameter,
                parm.kind.name(),
                value.kind()
            ))
        })?;
        Ok(())
    }

    fn selected_nodes(&self) -> Vec<String> {
        self.state.read().scene.selection.clone()
    }

    fn select_nodes(&self, paths: &[String]) -> Vec<String> {
        let mut state = self.state.write();
        let scene = &mut state.scene;

        let mut selected: Vec<String> = Vec::with_capacity(paths.len());
        for path in paths {
            if scene.nodes.contains_key(path) && !selected.contains(path) {
                selected.push(path.clone());
            }
        }
        scene.selection = selected.clone();
        selected
    }

    fn node_info(&self, path: &str) -> Result<NodeInfo, HostError> {
        let state = self.state.read();
        let node = state.scene.node(path)?;

        Ok(NodeInfo {
            path: path.to_string(),
            name: node.name.clone(),
            node_type: node.node_type.clone(),
            type_description: type_description(&node.node_type),
            position: node.position,
            parameters: node
                .parameters
                .iter()
                .map(|(name, parm)| ParameterInfo {
                    name: name.clone(),
                    label: parm.label.clone(),
                    kind: parm.kind.name().to_string(),
                    value: parm.value.clone(),
                })
                .collect(),
        })
    }

    fn save_scene(&self, path: Option<&Path>) -> Result<PathBuf, HostError> {
        let mut state = self.state.write();
        let target = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| state.scene_path.clone());

        let content = serde_json::to_string_pretty(&state.scene).map_err(|e| {
            HostError::SceneFormat {
                path: target.clone(),
                message: e.to_string(),
            }
        })?;
        std::fs::write(&target, content).map_err(|e| HostError::SceneWrite {
            path: target.clone(),
            source: e,
        })?;

        state.scene_path = target.clone();
        info!(path = %target.display(), "Saved scene");
        Ok(target)
    }

    fn load_scene(&self, path: &Path) -> Result<PathBuf, HostError> {
        let content = std::fs::read_to_string(path).map_err(|e| HostError::SceneRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut scene: Scene =
            serde_json::from_str(&content).map_err(|e| HostError::SceneFormat {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        scene.ensure_managers();
        let nodes = &scene.nodes;
        scene.selection.retain(|p| nodes.contains_key(p));

        let mut state = self.state.write();
        state.scene = scene;
        state.scene_path = path.to_path_buf();

        info!(path = %path.display(), "Loaded scene");
        Ok(path.to_path_buf())
    }
}
