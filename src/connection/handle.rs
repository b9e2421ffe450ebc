//! Connection Handle

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::Result;

/// Logical role of a listening endpoint and the connections it accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Source,
    Target,
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Group::Source => write!(f, "source"),
            Group::Target => write!(f, "target"),
        }
    }
}

/// Liveness state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Handle to one open WebSocket connection.
///
/// The handle owns the sending side of the connection's outbound queue; the
/// paired writer task owns the WebSocket sink half and drains the queue in
/// FIFO order. Sends are fire-and-forget enqueues and never await delivery.
pub struct ConnectionHandle {
    id: Uuid,
    peer_addr: SocketAddr,
    group: Group,
    outbound: mpsc::UnboundedSender<Message>,
    state: AtomicU8,
}

impl ConnectionHandle {
    /// Create a new connection handle in the `Connecting` state
    pub fn new(
        id: Uuid,
        peer_addr: SocketAddr,
        group: Group,
        outbound: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            id,
            peer_addr,
            group,
            outbound,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remote address, for diagnostics only
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn group(&self) -> Group {
        self.group
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Enqueue a message for delivery to this connection.
    ///
    /// Fails when the writer task has already gone away (channel closed);
    /// the caller treats that as a skipped forward, not a fatal error.
    pub fn send(&self, message: Message) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| anyhow!("connection {} is no longer writable", self.id))
    }

    /// Request an orderly close of this connection
    pub fn close(&self) {
        self.set_state(ConnectionState::Closing);
        let _ = self.outbound.send(Message::Close(None));
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("group", &self.group)
            .field("state", &self.state())
            .finish()
    }
}
