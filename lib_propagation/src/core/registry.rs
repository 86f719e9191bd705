//! # Live Channel Registry
//!
//! Process-wide table of open push connections (WebSocket sessions).
//!
//! Each connection is represented by the sending half of an unbounded MPSC
//! channel; the connection's own task owns the receiving half and writes to
//! the socket. Broadcasting therefore never blocks on a slow peer, and the
//! serialized frame is shared between connections through an `Arc<str>`.
//!
//! The map itself is private. Callers only `register`, `unregister` and
//! `broadcast`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;

/// Identity assigned when a connection is accepted. Never reused within a process.
pub type ConnectionId = u64;

/// A frame as handed to connection tasks.
pub type Frame = Arc<str>;

/// # Live Channel Registry
pub struct LiveChannelRegistry {
    /// The externally advertised notification address of this process.
    own_address: String,
    connections: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Frame>>>,
    next_id: AtomicU64,
}

impl LiveChannelRegistry {
    /// Creates an empty registry answering for `own_address`.
    pub fn new(own_address: impl Into<String>) -> Self {
        Self {
            own_address: own_address.into(),
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The address broadcasts must target to reach this registry's connections.
    pub fn own_address(&self) -> &str {
        &self.own_address
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<ConnectionId, mpsc::UnboundedSender<Frame>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Register
    ///
    /// Adds a freshly accepted connection and returns its id together with the
    /// receiver its task must drain into the socket.
    pub fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Frame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections().insert(id, tx);
        tracing::info!(connection_id = id, "Live channel connection registered");
        (id, rx)
    }

    /// Removes a connection. Returns `false` if it was already gone.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections().remove(&id).is_some();
        if removed {
            tracing::info!(connection_id = id, "Live channel connection unregistered");
        }
        removed
    }

    /// Number of currently registered connections.
    pub fn len(&self) -> usize {
        self.connections().len()
    }

    /// `true` when no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections().is_empty()
    }

    /// # Broadcast
    ///
    /// Sends `message` as JSON text to every registered connection when
    /// `address` is this process's own address, and returns how many
    /// connections accepted it.
    ///
    /// Each send is independent: a connection whose receiver is gone is
    /// removed and delivery continues with the others. Any other address is
    /// a remote endpoint and nothing is sent.
    pub fn broadcast(&self, address: &str, message: &Value) -> usize {
        if address != self.own_address {
            tracing::debug!(address, "Remote live-channel address; no local delivery");
            return 0;
        }

        let frame: Frame = Arc::from(message.to_string());
        let mut delivered = 0;

        self.connections().retain(|id, sender| match sender.send(Arc::clone(&frame)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                tracing::info!(connection_id = *id, "Live channel connection closed. Removing from registry.");
                false
            }
        });

        delivered
    }
}
