//! Command-line argument parsing for the hbridge binary
//!
//! Uses clap for argument parsing with derive macros.

use std::path::PathBuf;

use clap::Parser;
use hbridge_protocol::ApprovalMode;

use crate::config::AppConfig;

/// hbridge - agent-control bridge for a host 3D application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to the XDG config location)
    #[arg(long, short = 'c', env = "HBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Interface to bind, overriding the config file
    #[arg(long, env = "HBRIDGE_HOST")]
    pub host: Option<String>,

    /// Preferred port, overriding the config file
    #[arg(long, short = 'p', env = "HBRIDGE_PORT")]
    pub port: Option<u16>,

    /// Approval mode at startup: auto, preview or destructive
    #[arg(long, short = 'm')]
    pub mode: Option<ApprovalMode>,

    /// Answer approval prompts with the configured headless policy instead of
    /// asking on the terminal
    #[arg(long, default_value_t = false)]
    pub headless: bool,

    /// Debug logging on stderr
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Apply command-line overrides on top of a loaded config
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
            config.server.fallback_ports.retain(|p| *p != port);
        }
        if let Some(mode) = self.mode {
            config.approval.default_mode = mode;
        }
    }
}
