//! Lua 5.4 script runtime
//!
//! Every run gets a fresh interpreter with only the table, string, math and
//! utf8 libraries. Scripts see two globals:
//!
//! ```lua
//! session_state.count = (session_state.count or 0) + 1
//! local node = host.create_node("/obj", "geo", "rock")
//! host.set_parameter(node, "ty", 2.5)
//! result = { path = node, ty = host.get_parameter(node, "ty") }
//! ```

use std::sync::Arc;

use hbridge_protocol::{Map, Value};
use mlua::{Lua, LuaOptions, StdLib, Table, Value as LuaValue};
use tracing::debug;

use super::{ScriptError, ScriptRuntime, ScriptScope};
use crate::host::HostApplication;

const CHUNK_NAME: &str = "agent";

/// Deepest table nesting converted in either direction
const MAX_DEPTH: usize = 64;

const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Lua-backed [`ScriptRuntime`]
#[derive(Debug, Clone)]
pub struct LuaRuntime {
    memory_limit: Option<usize>,
}

impl LuaRuntime {
    pub fn new() -> Self {
        Self {
            memory_limit: Some(DEFAULT_MEMORY_LIMIT),
        }
    }

    /// Cap interpreter memory; `None` removes the cap
    pub fn with_memory_limit(mut self, limit: Option<usize>) -> Self {
        self.memory_limit = limit;
        self
    }

    fn create_state(&self) -> mlua::Result<Lua> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            LuaOptions::new(),
        )?;
        if let Some(limit) = self.memory_limit {
            lua.set_memory_limit(limit)?;
        }

        // The base library is always present; drop its file loaders
        let globals = lua.globals();
        globals.set("dofile", LuaValue::Nil)?;
        globals.set("loadfile", LuaValue::Nil)?;

        Ok(lua)
    }
}

impl Default for LuaRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptRuntime for LuaRuntime {
    fn name(&self) -> &str {
        "lua"
    }

    fn run(&self, code: &str, scope: ScriptScope<'_>) -> Result<Value, ScriptError> {
        let lua = self.create_state().map_err(script_error)?;
        register_host(&lua, scope.host).map_err(script_error)?;

        let globals = lua.globals();
        let session = to_lua(&lua, &Value::Map(scope.session.clone()), 0).map_err(script_error)?;
        globals.set("session_state", session).map_err(script_error)?;

        lua.load(code)
            .set_name(CHUNK_NAME)
            .exec()
            .map_err(script_error)?;

        let result = globals
            .get::<LuaValue>("result")
            .and_then(|v| from_lua(v, 0))
            .map_err(|e| ScriptError::new(format!("Invalid result: {}", e)))?;

        let session = globals
            .get::<LuaValue>("session_state")
            .and_then(|v| from_lua(v, 0))
            .map_err(|e| ScriptError::new(format!("Invalid session_state: {}", e)))?;
        match session {
            Value::Map(map) => *scope.session = map,
            other => {
                return Err(ScriptError::new(format!(
                    "session_state must remain a table with string keys, got {}",
                    other.kind()
                )))
            }
        }

        debug!(
            used_memory = lua.used_memory(),
            "Lua script finished"
        );
        Ok(result)
    }
}

/// Install the `host` table
fn register_host(lua: &Lua, host: Arc<dyn HostApplication>) -> mlua::Result<()> {
    let table = lua.create_table()?;

    let h = Arc::clone(&host);
    table.set(
        "get_parameter",
        lua.create_function(move |lua, (path, parameter): (String, String)| {
            let value = h
                .get_parameter(&path, &parameter)
                .map_err(mlua::Error::external)?;
            to_lua(lua, &value, 0)
        })?,
    )?;

    let h = Arc::clone(&host);
    table.set(
        "set_parameter",
        lua.create_function(
            move |_, (path, parameter, value): (String, String, LuaValue)| {
                let value = from_lua(value, 0)?;
                h.set_parameter(&path, &parameter, &value)
                    .map_err(mlua::Error::external)
            },
        )?,
    )?;

    let h = Arc::clone(&host);
    table.set(
        "create_node",
        lua.create_function(
            move |_, (parent, node_type, name): (String, String, Option<String>)| {
                let node = h
                    .create_node(&parent, &node_type, name.as_deref())
                    .map_err(mlua::Error::external)?;
                Ok(node.path)
            },
        )?,
    )?;

    let h = Arc::clone(&host);
    table.set(
        "delete_node",
        lua.create_function(move |_, path: String| {
            h.delete_node(&path).map_err(mlua::Error::external)
        })?,
    )?;

    let h = Arc::clone(&host);
    table.set(
        "selection",
        lua.create_function(move |lua, ()| {
            let selection: Value = h.selected_nodes().into_iter().map(Value::from).collect();
            to_lua(lua, &selection, 0)
        })?,
    )?;

    let h = Arc::clone(&host);
    table.set(
        "select",
        lua.create_function(move |lua, paths: Vec<String>| {
            let selected: Value = h.select_nodes(&paths).into_iter().map(Value::from).collect();
            to_lua(lua, &selected, 0)
        })?,
    )?;

    let h = host;
    table.set(
        "node_info",
        lua.create_function(move |lua, path: String| {
            let info = h.node_info(&path).map_err(mlua::Error::external)?;
            to_lua(lua, &info.to_value(), 0)
        })?,
    )?;

    lua.globals().set("host", table)
}

fn to_lua(lua: &Lua, value: &Value, depth: usize) -> mlua::Result<LuaValue> {
    if depth > MAX_DEPTH {
        return Err(mlua::Error::runtime("value nested too deeply"));
    }

    Ok(match value {
        Value::Nil => LuaValue::Nil,
        Value::Bool(b) => LuaValue::Boolean(*b),
        Value::Int(i) => LuaValue::Integer(*i),
        Value::Float(f) => LuaValue::Number(*f),
        Value::String(s) => LuaValue::String(lua.create_string(s)?),
        Value::Binary(bytes) => LuaValue::String(lua.create_string(bytes)?),
        Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, to_lua(lua, item, depth + 1)?)?;
            }
            LuaValue::Table(table)
        }
        Value::Map(map) => {
            let table = lua.create_table()?;
            for (key, item) in map {
                table.raw_set(key.as_str(), to_lua(lua, item, depth + 1)?)?;
            }
            LuaValue::Table(table)
        }
    })
}

fn from_lua(value: LuaValue, depth: usize) -> mlua::Result<Value> {
    if depth > MAX_DEPTH {
        return Err(mlua::Error::runtime("value nested too deeply"));
    }

    match value {
        LuaValue::Nil => Ok(Value::Nil),
        LuaValue::LightUserData(ud) if ud.0.is_null() => Ok(Value::Nil),
        LuaValue::Boolean(b) => Ok(Value::Bool(b)),
        LuaValue::Integer(i) => Ok(Value::Int(i)),
        LuaValue::Number(n) => Ok(Value::Float(n)),
        LuaValue::String(s) => Ok(match s.to_str() {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => Value::Binary(s.as_bytes().to_vec()),
        }),
        LuaValue::Table(table) => table_to_value(table, depth),
        other => Err(mlua::Error::runtime(format!(
            "cannot convert {} to a bridge value",
            other.type_name()
        ))),
    }
}

/// Sequences become arrays; everything else becomes a string-keyed map
fn table_to_value(table: Table, depth: usize) -> mlua::Result<Value> {
    let len = table.raw_len();
    let mut entries = Vec::new();
    for pair in table.pairs::<LuaValue, LuaValue>() {
        entries.push(pair?);
    }

    if len > 0 && entries.len() == len {
        let mut items = Vec::with_capacity(len);
        for i in 1..=len {
            items.push(from_lua(table.raw_get::<LuaValue>(i)?, depth + 1)?);
        }
        return Ok(Value::Array(items));
    }

    let mut map = Map::new();
    for (key, item) in entries {
        let key = match key {
            LuaValue::String(s) => s.to_str()?.to_string(),
            LuaValue::Integer(i) => i.to_string(),
            other => {
                return Err(mlua::Error::runtime(format!(
                    "table keys must be strings, got {}",
                    other.type_name()
                )))
            }
        };
        map.insert(key, from_lua(item, depth + 1)?);
    }
    Ok(Value::Map(map))
}

fn script_error(err: mlua::Error) -> ScriptError {
    match err {
        mlua::Error::CallbackError { traceback, cause } => {
            let mut cause: &mlua::Error = cause.as_ref();
            while let mlua::Error::CallbackError { cause: inner, .. } = cause {
                cause = inner.as_ref();
            }
            ScriptError {
                message: cause.to_string(),
                traceback: Some(traceback),
            }
        }
        mlua::Error::SyntaxError { message, .. } => ScriptError::new(message),
        mlua::Error::RuntimeError(text) => {
            let message = text
                .split_once("\nstack traceback:")
                .map(|(message, _)| message.to_string())
                .unwrap_or_else(|| text.clone());
            ScriptError {
                message,
                traceback: Some(text),
            }
        }
        other => ScriptError::new(other.to_string()),
    }
}
