//! hbridge - standalone bridge host
//!
//! Serves the bridge against an in-memory scene. The main thread plays the
//! host's UI thread: it answers approval prompts until Ctrl-C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use hbridge_server::approval::{ui_prompt, ApprovalPrompt, ConsolePrompt, HeadlessPrompt};
use hbridge_server::cli::Args;
use hbridge_server::config::AppConfig;
use hbridge_server::{
    get_or_create_server, stop_server, ApprovalManager, CommandExecutor, ConfigLoader,
    InMemoryHost, LuaRuntime, MessageDispatcher, ServiceRegistry, StopStatus,
};
use hbridge_utils::{BridgeError, LogConfig, Result};

const PROMPT_POLL: Duration = Duration::from_millis(100);

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => ConfigLoader::load_and_validate_from(path)?,
        None => ConfigLoader::load_and_validate()?,
    };
    args.apply(&mut config);
    ConfigLoader::validate(&config)?;
    Ok(config)
}

/// Flag set once Ctrl-C is received
fn watch_ctrl_c() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| BridgeError::runtime(format!("failed to build signal runtime: {}", e)))?;

    std::thread::Builder::new()
        .name("hbridge-signal".into())
        .spawn(move || {
            match runtime.block_on(tokio::signal::ctrl_c()) {
                Ok(()) => info!("Ctrl-C received, shutting down"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
            }
            flag.store(true, Ordering::SeqCst);
        })?;

    Ok(stop)
}

fn main() -> Result<()> {
    let args = Args::parse_args();

    let log_config = if args.verbose {
        LogConfig::development()
    } else {
        LogConfig::server()
    };
    hbridge_utils::init_logging_with_config(log_config)?;

    let config = load_config(&args)?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        mode = %config.approval.default_mode,
        headless = args.headless,
        "Starting hbridge"
    );

    let operator: Arc<dyn ApprovalPrompt> = if args.headless {
        Arc::new(HeadlessPrompt::new(config.approval.headless_policy))
    } else {
        Arc::new(ConsolePrompt::stdio())
    };
    let (prompt, pump) = ui_prompt(operator);

    let mut executor = CommandExecutor::new(Arc::new(InMemoryHost::new()));
    if config.scripting.enabled {
        executor = executor.with_script_runtime(Arc::new(LuaRuntime::new()));
    }
    if !executor.has_script_runtime() {
        warn!("Script execution disabled");
    }
    let approval = ApprovalManager::new(config.approval.default_mode, Arc::new(prompt));
    let max_message_size = config.server.max_message_size;

    let registry = ServiceRegistry::global();
    let server = get_or_create_server(registry, config.server.clone(), || {
        MessageDispatcher::new(executor, approval).with_max_message_size(max_message_size)
    })?;
    if let Some(addr) = server.local_addr() {
        info!(%addr, "Listening for agents on ws://{}", addr);
    }
    drop(server);

    let stop = watch_ctrl_c()?;
    pump.run_until(|| stop.load(Ordering::SeqCst), PROMPT_POLL);
    // Prompts still queued are dismissed so their workers can finish
    drop(pump);

    match stop_server(registry) {
        StopStatus::TimedOut => warn!("Bridge did not stop within the timeout"),
        status => info!(?status, "Bridge shut down"),
    }
    Ok(())
}
