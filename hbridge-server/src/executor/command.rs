//! Command classification and field access

use hbridge_protocol::{Map, Value};

use super::CommandError;

/// Every command type the executor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    CreateNode,
    DeleteNode,
    SetParameter,
    GetParameter,
    GetSelection,
    SelectNodes,
    GetNodeInfo,
    ExecutePython,
    ExecuteScript,
    SaveScene,
    LoadScene,
    GetSessionState,
    SetSessionState,
}

impl CommandKind {
    pub const ALL: [CommandKind; 13] = [
        CommandKind::CreateNode,
        CommandKind::DeleteNode,
        CommandKind::SetParameter,
        CommandKind::GetParameter,
        CommandKind::GetSelection,
        CommandKind::SelectNodes,
        CommandKind::GetNodeInfo,
        CommandKind::ExecutePython,
        CommandKind::ExecuteScript,
        CommandKind::SaveScene,
        CommandKind::LoadScene,
        CommandKind::GetSessionState,
        CommandKind::SetSessionState,
    ];

    /// Wire tag for this command
    pub fn tag(self) -> &'static str {
        match self {
            CommandKind::CreateNode => "create_node",
            CommandKind::DeleteNode => "delete_node",
            CommandKind::SetParameter => "set_parameter",
            CommandKind::GetParameter => "get_parameter",
            CommandKind::GetSelection => "get_selection",
            CommandKind::SelectNodes => "select_nodes",
            CommandKind::GetNodeInfo => "get_node_info",
            CommandKind::ExecutePython => "execute_python",
            CommandKind::ExecuteScript => "execute_script",
            CommandKind::SaveScene => "save_scene",
            CommandKind::LoadScene => "load_scene",
            CommandKind::GetSessionState => "get_session_state",
            CommandKind::SetSessionState => "set_session_state",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Whether the command mutates host state
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            CommandKind::CreateNode
                | CommandKind::DeleteNode
                | CommandKind::SetParameter
                | CommandKind::ExecutePython
                | CommandKind::ExecuteScript
                | CommandKind::LoadScene
        )
    }

    /// Runs arbitrary code through the script runtime
    pub fn is_script(self) -> bool {
        matches!(self, CommandKind::ExecutePython | CommandKind::ExecuteScript)
    }
}

/// Destructiveness of a raw command; unknown or missing types are not
/// destructive.
pub fn is_destructive(command: &Value) -> bool {
    command
        .get("type")
        .and_then(Value::as_str)
        .and_then(CommandKind::from_tag)
        .is_some_and(CommandKind::is_destructive)
}

/// Typed access to a command's fields. Nil counts as absent.
#[derive(Debug, Clone, Copy)]
pub struct CommandView<'a> {
    fields: Option<&'a Map>,
}

impl<'a> CommandView<'a> {
    pub fn new(command: &'a Value) -> Result<Self, CommandError> {
        match command {
            Value::Map(map) => Ok(Self { fields: Some(map) }),
            Value::Nil => Ok(Self { fields: None }),
            other => Err(CommandError::InvalidField {
                field: "command",
                expected: "map",
                got: other.kind(),
            }),
        }
    }

    /// A present, non-nil field
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.fields
            .and_then(|fields| fields.get(name))
            .filter(|value| !value.is_nil())
    }

    pub fn require(&self, name: &'static str) -> Result<&'a Value, CommandError> {
        self.get(name).ok_or(CommandError::MissingField(name))
    }

    pub fn require_str(&self, name: &'static str) -> Result<&'a str, CommandError> {
        let value = self.require(name)?;
        value.as_str().ok_or(CommandError::InvalidField {
            field: name,
            expected: "string",
            got: value.kind(),
        })
    }

    pub fn opt_str(&self, name: &'static str) -> Result<Option<&'a str>, CommandError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(CommandError::InvalidField {
                field: name,
                expected: "string",
                got: other.kind(),
            }),
        }
    }

    pub fn opt_map(&self, name: &'static str) -> Result<Option<&'a Map>, CommandError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Map(map)) => Ok(Some(map)),
            Some(other) => Err(CommandError::InvalidField {
                field: name,
                expected: "map",
                got: other.kind(),
            }),
        }
    }

    /// Optional list of strings; absent means empty
    pub fn str_list(&self, name: &'static str) -> Result<Vec<String>, CommandError> {
        let items = match self.get(name) {
            None => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(CommandError::InvalidField {
                    field: name,
                    expected: "array of strings",
                    got: other.kind(),
                })
            }
        };

        items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or(CommandError::InvalidField {
                    field: name,
                    expected: "array of strings",
                    got: item.kind(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tags_round_trip() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(CommandKind::from_tag("launch_rocket"), None);
    }

    #[test]
    fn test_destructive_set() {
        let destructive: Vec<_> = CommandKind::ALL
            .into_iter()
            .filter(|k| k.is_destructive())
            .map(CommandKind::tag)
            .collect();
        assert_eq!(
            destructive,
            vec![
                "create_node",
                "delete_node",
                "set_parameter",
                "execute_python",
                "execute_script",
                "load_scene"
            ]
        );
    }

    #[test]
    fn test_is_destructive_raw() {
        assert!(is_destructive(&Value::from(json!({"type": "delete_node"}))));
        assert!(!is_destructive(&Value::from(json!({"type": "get_selection"}))));
        assert!(!is_destructive(&Value::from(json!({"type": "mystery"}))));
        assert!(!is_destructive(&Value::Nil));
    }

    #[test]
    fn test_view_fields() {
        let command = Value::from(json!({
            "node_path": "/obj/a",
            "count": 3,
            "nothing": null,
            "nodes": ["/obj/a", "/obj/b"],
        }));
        let view = CommandView::new(&command).unwrap();

        assert_eq!(view.require_str("node_path").unwrap(), "/obj/a");
        assert!(view.get("nothing").is_none());
        assert!(matches!(
            view.require("nothing"),
            Err(CommandError::MissingField("nothing"))
        ));
        assert_eq!(
            view.str_list("nodes").unwrap(),
            vec!["/obj/a".to_string(), "/obj/b".to_string()]
        );
        assert!(view.str_list("absent").unwrap().is_empty());
        assert_eq!(view.opt_str("absent").unwrap(), None);
    }

    #[test]
    fn test_view_type_errors() {
        let command = Value::from(json!({"node_path": 5, "nodes": [1]}));
        let view = CommandView::new(&command).unwrap();

        let err = view.require_str("node_path").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid field node_path: expected string, got int"
        );
        assert!(view.str_list("nodes").is_err());
    }

    #[test]
    fn test_view_over_nil_and_non_map() {
        let nil = Value::Nil;
        let view = CommandView::new(&nil).unwrap();
        assert!(matches!(
            view.require_str("type"),
            Err(CommandError::MissingField("type"))
        ));

        let text = Value::from("create_node");
        assert!(CommandView::new(&text).is_err());
    }
}
