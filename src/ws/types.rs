// axum-chat-hub/src/ws/types.rs

//! Identifiers and handles shared by the hub and its connections.

use axum::extract::ws::Utf8Bytes;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// The identity of an authenticated user. Sole key into the registry.
pub type UserId = i64;

/// A unique identifier for a single live connection.
pub type ConnectionId = Uuid;

/// A serialized envelope on its way to a client. The hub never looks inside.
pub type Frame = Utf8Bytes;

/// The registry-owned half of a connection.
///
/// Holds the only sender for the connection's outbound queue. Dropping the
/// handle (which the registry does on unregister, eviction or replacement)
/// closes the queue and ends the connection's write pump.
pub struct ConnectionHandle {
    pub(crate) id: ConnectionId,
    pub(crate) user_id: UserId,
    pub(crate) outbound: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    /// Creates a handle for `user_id` with an outbound queue of `capacity`
    /// frames, returning the receiving end of that queue.
    ///
    /// The receiver belongs to whatever drains the queue: normally the write
    /// pump of a WebSocket connection, but any transport will do.
    pub fn new(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::new_v4(),
            user_id,
            outbound,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The key the connection keeps for itself in order to unregister later.
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey {
            id: self.id,
            user_id: self.user_id,
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("queued", &(self.outbound.max_capacity() - self.outbound.capacity()))
            .finish()
    }
}

/// Identifies one specific connection of one user.
///
/// Unregistering by key rather than by user id means a stale connection can
/// never remove the newer one that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub id: ConnectionId,
    pub user_id: UserId,
}

/// Lifecycle of a connection as seen from its own pumps. Ordered by
/// progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Active,
    Closing,
    Closed,
}
