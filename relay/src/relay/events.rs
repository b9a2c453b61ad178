use std::fmt;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::network::error::NetworkResult;
use crate::network::upstream::{UpstreamEvent, UpstreamSession};
use crate::relay::protocol::{ClientEvent, ServerEvent};
use crate::relay::state::ConnectionState;

/// Opaque identifier of one transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id; callers keep ids unique
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Everything the relay task reacts to
///
/// Transport input, upstream callbacks, and open results all arrive on the
/// same channel and are handled one at a time.
pub enum RelayEvent {
    /// A transport connection appeared
    Connected {
        id: ConnectionId,
        outbound: mpsc::UnboundedSender<ServerEvent>,
    },

    /// A client sent an event
    Client { id: ConnectionId, event: ClientEvent },

    /// The transport connection is gone
    Disconnected { id: ConnectionId },

    /// An upstream open finished
    UpstreamOpened {
        id: ConnectionId,
        epoch: u64,
        result: NetworkResult<Box<dyn UpstreamSession>>,
    },

    /// An open upstream session reported something
    Upstream {
        id: ConnectionId,
        epoch: u64,
        event: UpstreamEvent,
    },

    /// Ask for the current state of a connection
    QueryState {
        id: ConnectionId,
        reply: oneshot::Sender<Option<ConnectionState>>,
    },

    /// Close every session and stop the relay task
    Shutdown,
}

impl RelayEvent {
    /// Event kind (for logging)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Client { .. } => "client",
            Self::Disconnected { .. } => "disconnected",
            Self::UpstreamOpened { .. } => "upstream-opened",
            Self::Upstream { .. } => "upstream",
            Self::QueryState { .. } => "query-state",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Debug for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayEvent")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// Cloneable handle for feeding the relay task
///
/// Every method returns `false` once the relay has stopped.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<RelayEvent>,
}

impl RelayHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<RelayEvent>) -> Self {
        Self { tx }
    }

    /// Register a connection and the channel its events go out on
    pub fn connect(&self, id: ConnectionId, outbound: mpsc::UnboundedSender<ServerEvent>) -> bool {
        self.send(RelayEvent::Connected { id, outbound })
    }

    /// Deliver a client event
    pub fn client_event(&self, id: ConnectionId, event: ClientEvent) -> bool {
        self.send(RelayEvent::Client { id, event })
    }

    /// Report a transport disconnect
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.send(RelayEvent::Disconnected { id })
    }

    /// Stop the relay
    pub fn shutdown(&self) -> bool {
        self.send(RelayEvent::Shutdown)
    }

    /// Current state of `id`; `None` if unknown or the relay stopped
    pub async fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        let (reply, rx) = oneshot::channel();
        if !self.send(RelayEvent::QueryState { id, reply }) {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Check if the relay task is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: RelayEvent) -> bool {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            warn!(kind, "Relay stopped, event dropped");
            return false;
        }
        true
    }
}
