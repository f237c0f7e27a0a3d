//! Bridge configuration

mod loader;
mod schema;

pub use loader::ConfigLoader;
pub use schema::{AppConfig, ApprovalConfig, HeadlessPolicy, ScriptingConfig, ServerConfig};
