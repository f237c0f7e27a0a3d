//! Active connection registry
//!
//! Tracks every open WebSocket so the server can broadcast to all of them
//! and close them on shutdown. Shared between the accept loop and every
//! connection task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connection({})", self.0)
    }
}

/// Frames queued for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Binary(Vec<u8>),
    Close,
}

/// Entry for an open connection
pub struct ConnectionEntry {
    pub sender: mpsc::Sender<Outbound>,
    pub peer: SocketAddr,
    pub connected_at: Instant,
}

impl std::fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("peer", &self.peer)
            .field("connected_at", &self.connected_at)
            .field("sender_closed", &self.sender.is_closed())
            .finish()
    }
}

/// Registry of open connections
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a connection and return its id
    pub fn register(&self, sender: mpsc::Sender<Outbound>, peer: SocketAddr) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.connections.insert(
            id,
            ConnectionEntry {
                sender,
                peer,
                connected_at: Instant::now(),
            },
        );
        debug!(connection = %id, %peer, "Registered connection");
        id
    }

    /// Remove a connection. Returns false if it was not registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some((_, entry)) => {
                debug!(
                    connection = %id,
                    peer = %entry.peer,
                    open_for = ?entry.connected_at.elapsed(),
                    "Unregistered connection"
                );
                true
            }
            None => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Peer address of a connection
    pub fn peer(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&id).map(|entry| entry.peer)
    }

    /// Queue a frame without waiting.
    ///
    /// A closed channel means the connection is gone; it is unregistered.
    pub fn try_send(&self, id: ConnectionId, frame: Outbound) -> bool {
        let sender = match self.connections.get(&id) {
            Some(entry) => entry.sender.clone(),
            None => return false,
        };

        match sender.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(connection = %id, "Connection channel closed, removing from registry");
                self.unregister(id);
                false
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection = %id, "Connection channel full, frame dropped");
                false
            }
        }
    }

    /// Queue one encoded message on every open connection.
    ///
    /// Returns how many connections accepted it.
    pub fn broadcast(&self, bytes: &[u8]) -> usize {
        // Collect first so no shard lock is held while unregistering
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();

        let delivered = ids
            .into_iter()
            .filter(|id| self.try_send(*id, Outbound::Binary(bytes.to_vec())))
            .count();
        debug!(delivered, len = bytes.len(), "Broadcast queued");
        delivered
    }

    /// Ask every connection to close. Returns how many were asked.
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter(|id| self.try_send(*id, Outbound::Close))
            .count()
    }
}
