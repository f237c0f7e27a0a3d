//! hbridge-server: agent-control bridge for a host 3D application
//!
//! An external agent connects over WebSocket and sends MessagePack
//! envelopes. Each command passes an operator approval gate before it runs
//! against the host through [`HostApplication`].
//!
//! ```text
//! client ──ws──▶ BridgeServer ──▶ MessageDispatcher ──▶ ApprovalManager
//!                                        │                    │
//!                                        ▼                    ▼
//!                                 CommandExecutor      ApprovalPrompt (UI thread)
//!                                        │
//!                                        ▼
//!                          HostApplication / ScriptRuntime
//! ```

pub mod approval;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod executor;
pub mod host;
pub mod instance;
pub mod script;
pub mod server;

pub use approval::{ApprovalManager, ApprovalPrompt, BatchItem};
pub use config::{AppConfig, ConfigLoader};
pub use dispatch::MessageDispatcher;
pub use executor::{CommandExecutor, CommandKind, SessionState};
pub use host::{HostApplication, HostError, InMemoryHost};
pub use instance::{get_or_create_server, stop_server, ServiceRegistry};
pub use script::{LuaRuntime, ScriptRuntime};
pub use server::{BridgeServer, StopStatus};
