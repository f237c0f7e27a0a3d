//! Bridge server
//!
//! Owns the listening socket and a dedicated `hbridge-server` thread running
//! a tokio runtime. The host's own thread only ever calls [`BridgeServer::start`]
//! and [`BridgeServer::stop`], which never wait on network I/O beyond the
//! bounded stop timeout.

mod connection;
mod registry;

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hbridge_protocol::codec;
use hbridge_utils::{BridgeError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::dispatch::MessageDispatcher;
use connection::{handle_connection, ConnectionContext};

pub use registry::{ConnectionEntry, ConnectionId, ConnectionRegistry, Outbound};

/// Outcome of [`BridgeServer::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
    Stopped,
    /// The server thread did not exit in time and was left detached
    TimedOut,
    NotRunning,
}

struct Running {
    shutdown: CancellationToken,
    thread: JoinHandle<()>,
    finished: std_mpsc::Receiver<()>,
    local_addr: SocketAddr,
}

/// WebSocket server feeding a [`MessageDispatcher`]
pub struct BridgeServer {
    config: ServerConfig,
    dispatcher: Arc<MessageDispatcher>,
    registry: Arc<ConnectionRegistry>,
    running: Mutex<Option<Running>>,
}

impl BridgeServer {
    pub fn new(config: ServerConfig, dispatcher: Arc<MessageDispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            registry: Arc::new(ConnectionRegistry::new()),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Address the listener is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    /// Bind and start serving. Starting a running server is a no-op.
    pub fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock();
        if let Some(current) = running.as_ref() {
            warn!(addr = %current.local_addr, "Bridge server already running");
            return Ok(current.local_addr);
        }

        let (listener, local_addr) = bind_first(&self.config.host, &self.config.candidate_ports())?;
        listener.set_nonblocking(true)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.worker_threads)
            .thread_name("hbridge-worker")
            .enable_all()
            .build()
            .map_err(|e| BridgeError::runtime(format!("failed to build runtime: {}", e)))?;
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(listener).map_err(|e| {
                BridgeError::transport(format!("failed to register listener on {}: {}", local_addr, e))
            })?
        };

        let shutdown = CancellationToken::new();
        let ctx = ConnectionContext {
            dispatcher: Arc::clone(&self.dispatcher),
            registry: Arc::clone(&self.registry),
            max_message_size: self.config.max_message_size,
            shutdown: shutdown.clone(),
        };
        // Draining gets half the stop budget; stuck blocking tasks may hold
        // the runtime past the full budget, which `stop` reports as a timeout
        let drain = self.config.stop_timeout() / 2;
        let shutdown_budget = self.config.stop_timeout();
        let (finished_tx, finished) = std_mpsc::channel();

        let thread = thread::Builder::new()
            .name("hbridge-server".into())
            .spawn(move || {
                runtime.block_on(run_accept_loop(listener, ctx, drain));
                runtime.shutdown_timeout(shutdown_budget);
                let _ = finished_tx.send(());
            })?;

        info!(addr = %local_addr, "Bridge server started");
        *running = Some(Running {
            shutdown,
            thread,
            finished,
            local_addr,
        });
        Ok(local_addr)
    }

    /// Close every connection and the listener, then wait for the server
    /// thread up to the configured stop timeout.
    pub fn stop(&self) -> StopStatus {
        let Some(running) = self.running.lock().take() else {
            debug!("Bridge server not running");
            return StopStatus::NotRunning;
        };

        running.shutdown.cancel();
        match running.finished.recv_timeout(self.config.stop_timeout()) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                if running.thread.join().is_err() {
                    error!("Bridge server thread panicked");
                }
                info!(addr = %running.local_addr, "Bridge server stopped");
                StopStatus::Stopped
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    timeout = ?self.config.stop_timeout(),
                    "Bridge server thread did not exit in time"
                );
                StopStatus::TimedOut
            }
        }
    }

    /// Send one message to every open connection, best effort.
    ///
    /// Returns how many connections it was queued for.
    pub fn broadcast<T: Serialize + ?Sized>(&self, message: &T) -> usize {
        match codec::encode_with_limit(message, self.config.max_message_size) {
            Ok(bytes) => self.registry.broadcast(&bytes),
            Err(e) => {
                warn!(error = %e, "Failed to encode broadcast");
                0
            }
        }
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

/// Bind the first free port, in order
fn bind_first(host: &str, ports: &[u16]) -> Result<(StdTcpListener, SocketAddr)> {
    for &port in ports {
        match StdTcpListener::bind((host, port)) {
            Ok(listener) => {
                let addr = listener.local_addr()?;
                return Ok((listener, addr));
            }
            Err(e) => debug!(host, port, error = %e, "Port unavailable"),
        }
    }

    error!(host, tried = ?ports, "No port available");
    Err(BridgeError::PortsExhausted {
        host: host.to_string(),
        tried: ports.to_vec(),
    })
}

async fn run_accept_loop(listener: TcpListener, ctx: ConnectionContext, grace: Duration) {
    let tracker = TaskTracker::new();

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                info!("Shutdown signal received, stopping accept loop");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        debug!(%peer, "New TCP connection");
                        tracker.spawn(handle_connection(stream, peer, ctx.clone()));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept error");
                    }
                }
            }
        }
    }

    drop(listener);
    let closing = ctx.registry.close_all();
    tracker.close();
    if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
        warn!(closing, "Connections did not close in time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalManager, HeadlessPrompt};
    use crate::executor::CommandExecutor;
    use crate::host::InMemoryHost;
    use hbridge_protocol::{ApprovalMode, Reply, Value};

    fn dispatcher() -> Arc<MessageDispatcher> {
        let executor = CommandExecutor::new(Arc::new(InMemoryHost::new()));
        let approval = ApprovalManager::new(ApprovalMode::Auto, Arc::new(HeadlessPrompt::default()));
        Arc::new(MessageDispatcher::new(executor, approval))
    }

    fn config(port: u16) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port,
            fallback_ports: vec![],
            stop_timeout_ms: 2000,
            ..Default::default()
        }
    }

    #[test]
    fn test_start_twice_keeps_one_listener() {
        let server = BridgeServer::new(config(0), dispatcher());
        let first = server.start().unwrap();
        let second = server.start().unwrap();

        assert_eq!(first, second);
        assert!(server.is_running());
        assert_eq!(server.local_addr(), Some(first));
        assert_eq!(server.stop(), StopStatus::Stopped);
    }

    #[test]
    fn test_stop_twice() {
        let server = BridgeServer::new(config(0), dispatcher());
        assert_eq!(server.stop(), StopStatus::NotRunning);

        server.start().unwrap();
        assert_eq!(server.stop(), StopStatus::Stopped);
        assert_eq!(server.stop(), StopStatus::NotRunning);
        assert!(!server.is_running());
        assert_eq!(server.local_addr(), None);
    }

    #[test]
    fn test_restart_after_stop() {
        let server = BridgeServer::new(config(0), dispatcher());
        server.start().unwrap();
        server.stop();
        server.start().unwrap();
        assert!(server.is_running());
        server.stop();
    }

    #[test]
    fn test_falls_back_to_next_port() {
        let taken = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let taken_port = taken.local_addr().unwrap().port();
        let free_port = StdTcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let mut cfg = config(taken_port);
        cfg.fallback_ports = vec![free_port];
        let server = BridgeServer::new(cfg, dispatcher());

        let addr = server.start().unwrap();
        assert_eq!(addr.port(), free_port);
        server.stop();
    }

    #[test]
    fn test_ports_exhausted() {
        let taken = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let server = BridgeServer::new(config(port), dispatcher());
        let err = server.start().unwrap_err();

        match err {
            BridgeError::PortsExhausted { tried, .. } => assert_eq!(tried, vec![port]),
            other => panic!("unexpected error: {}", other),
        }
        assert!(!server.is_running());
    }

    #[test]
    fn test_broadcast_without_connections() {
        let server = BridgeServer::new(config(0), dispatcher());
        assert_eq!(server.broadcast(&Reply::ok(Value::Nil)), 0);
    }
}
