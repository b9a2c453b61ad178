//! Connection table and transition function
//!
//! One [`SessionRelay`] owns every connection. It runs as a single task
//! draining one channel of [`RelayEvent`]s; each event is applied to the
//! table by [`SessionRelay::dispatch`] before the next one is read, so the
//! table needs no locking.
//!
//! Upstream sessions are tagged with a per-connection epoch. The epoch moves
//! forward whenever a session is started or discarded, so callbacks and open
//! results that belong to an earlier session are recognised and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::network::error::NetworkResult;
use crate::network::upstream::{
    ServerContent, UpstreamConnector, UpstreamContent, UpstreamEvent, UpstreamListener,
    UpstreamSession,
};
use crate::relay::error::RelayError;
use crate::relay::events::{ConnectionId, RelayEvent, RelayHandle};
use crate::relay::protocol::{ClientEvent, ServerEvent};
use crate::relay::state::ConnectionState;

/// How multi-part server messages reach the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartRouting {
    /// Forward the first part, log and drop the rest
    #[default]
    FirstOnly,

    /// Forward every part in order
    All,
}

struct Connection {
    state: ConnectionState,
    outbound: mpsc::UnboundedSender<ServerEvent>,
    session: Option<Box<dyn UpstreamSession>>,
    epoch: u64,
    /// Upstream events that arrived before the open result, in order
    held: Vec<UpstreamEvent>,
}

impl Connection {
    fn new(outbound: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            state: ConnectionState::Idle,
            outbound,
            session: None,
            epoch: 0,
            held: Vec::new(),
        }
    }

    fn emit(&self, id: ConnectionId, event: ServerEvent) {
        debug!(conn = %id, event = event.name(), "Sending to client");
        if self.outbound.send(event).is_err() {
            debug!(conn = %id, "Client channel closed, event dropped");
        }
    }

    fn set_state(&mut self, id: ConnectionId, next: ConnectionState) {
        if !self.state.can_transition_to(next) {
            warn!(conn = %id, from = %self.state, to = %next, "Unexpected state transition");
        }
        debug!(conn = %id, from = %self.state, to = %next, "State transition");
        self.state = next;
    }

    /// Close and drop the session; `true` if there was one
    fn discard_session(&mut self) -> bool {
        match self.session.take() {
            Some(mut session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Leave any session behind and return to `Idle`
    ///
    /// Returns whether an open session was closed.
    fn teardown(&mut self, id: ConnectionId) -> bool {
        self.epoch += 1;
        self.held.clear();
        if self.state.is_active() {
            self.set_state(id, ConnectionState::Closing);
        }
        let closed = self.discard_session();
        self.set_state(id, ConnectionState::Idle);
        closed
    }
}

/// Multiplexes client connections onto upstream sessions
pub struct SessionRelay {
    connections: HashMap<ConnectionId, Connection>,
    connector: Arc<dyn UpstreamConnector>,
    events_tx: mpsc::UnboundedSender<RelayEvent>,
    routing: PartRouting,
}

impl SessionRelay {
    /// Create a relay and the receiving end of its event channel
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        routing: PartRouting,
    ) -> (Self, mpsc::UnboundedReceiver<RelayEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let relay = Self {
            connections: HashMap::new(),
            connector,
            events_tx,
            routing,
        };

        (relay, events_rx)
    }

    /// Create a relay and run it on a new task
    pub fn spawn(
        connector: Arc<dyn UpstreamConnector>,
        routing: PartRouting,
    ) -> (RelayHandle, JoinHandle<()>) {
        let (relay, events_rx) = Self::new(connector, routing);
        let handle = relay.handle();
        let task = tokio::spawn(relay.run(events_rx));
        (handle, task)
    }

    /// Handle feeding this relay's channel
    pub fn handle(&self) -> RelayHandle {
        RelayHandle::new(self.events_tx.clone())
    }

    /// Part routing mode
    pub fn routing(&self) -> PartRouting {
        self.routing
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// State of one connection
    pub fn connection_state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(&id).map(|conn| conn.state)
    }

    /// Process events until `Shutdown`
    pub async fn run(mut self, mut events_rx: mpsc::UnboundedReceiver<RelayEvent>) {
        info!(routing = ?self.routing, "Session relay started");

        while let Some(event) = events_rx.recv().await {
            if !self.dispatch(event) {
                break;
            }
        }

        self.close_all();
        info!("Session relay stopped");
    }

    /// Apply one event to the table
    ///
    /// Returns `false` once the relay should stop.
    pub fn dispatch(&mut self, event: RelayEvent) -> bool {
        match event {
            RelayEvent::Connected { id, outbound } => self.handle_connected(id, outbound),
            RelayEvent::Client { id, event } => self.handle_client(id, event),
            RelayEvent::Disconnected { id } => self.handle_disconnected(id),
            RelayEvent::UpstreamOpened { id, epoch, result } => {
                self.handle_opened(id, epoch, result)
            }
            RelayEvent::Upstream { id, epoch, event } => self.handle_upstream(id, epoch, event),
            RelayEvent::QueryState { id, reply } => {
                let _ = reply.send(self.connection_state(id));
            }
            RelayEvent::Shutdown => {
                info!("Shutdown requested");
                self.close_all();
                return false;
            }
        }
        true
    }

    fn handle_connected(&mut self, id: ConnectionId, outbound: mpsc::UnboundedSender<ServerEvent>) {
        if let Some(mut previous) = self.connections.insert(id, Connection::new(outbound)) {
            warn!(conn = %id, "Connection id reused, dropping previous connection");
            previous.discard_session();
        }
        info!(conn = %id, total = self.connections.len(), "Connection registered");
    }

    fn handle_client(&mut self, id: ConnectionId, event: ClientEvent) {
        let Some(conn) = self.connections.get_mut(&id) else {
            warn!(conn = %id, event = event.name(), "Event for unknown connection");
            return;
        };

        debug!(conn = %id, event = event.name(), state = %conn.state, "Client event");

        match event {
            ClientEvent::StartSession => {
                if !conn.state.is_idle() {
                    conn.emit(id, ServerEvent::from(&RelayError::SessionAlreadyActive));
                    return;
                }
                conn.epoch += 1;
                let epoch = conn.epoch;
                conn.set_state(id, ConnectionState::Connecting);
                self.open_upstream(id, epoch);
            }
            ClientEvent::EndSession => {
                if conn.teardown(id) {
                    info!(conn = %id, "Session ended by client");
                    conn.emit(id, ServerEvent::closed("ended by client"));
                }
            }
            content_event => {
                if let Some(content) = content_event.into_content() {
                    Self::forward(id, conn, content);
                }
            }
        }
    }

    fn open_upstream(&self, id: ConnectionId, epoch: u64) {
        let callback_tx = self.events_tx.clone();
        let listener = UpstreamListener::new(move |event| {
            let _ = callback_tx.send(RelayEvent::Upstream { id, epoch, event });
        });

        let open = self.connector.open(listener);
        let result_tx = self.events_tx.clone();

        tokio::spawn(async move {
            let result = open.await;
            let _ = result_tx.send(RelayEvent::UpstreamOpened { id, epoch, result });
        });

        info!(conn = %id, epoch, "Opening upstream session");
    }

    fn forward(id: ConnectionId, conn: &mut Connection, content: UpstreamContent) {
        let Some(session) = conn.session.as_mut() else {
            conn.emit(id, ServerEvent::from(&RelayError::NoActiveSession));
            return;
        };

        if let Err(e) = session.send(content) {
            warn!(conn = %id, error = %e, "Upstream send failed");
            conn.emit(id, ServerEvent::from(&RelayError::UpstreamRuntime(e.to_string())));
            conn.teardown(id);
        }
    }

    fn handle_opened(
        &mut self,
        id: ConnectionId,
        epoch: u64,
        result: NetworkResult<Box<dyn UpstreamSession>>,
    ) {
        let routing = self.routing;
        let current = self
            .connections
            .get_mut(&id)
            .filter(|conn| conn.epoch == epoch && conn.state.is_connecting());

        let Some(conn) = current else {
            if let Ok(mut session) = result {
                session.close();
                info!(conn = %id, epoch, "Upstream opened after the session was abandoned, closed");
            }
            return;
        };

        match result {
            Ok(session) => {
                conn.session = Some(session);
                conn.set_state(id, ConnectionState::Active);
                info!(conn = %id, epoch, "Upstream session active");
                conn.emit(id, ServerEvent::SessionStarted);

                let held = std::mem::take(&mut conn.held);
                if !held.is_empty() {
                    debug!(conn = %id, count = held.len(), "Replaying events received during open");
                }
                for event in held {
                    if !conn.state.is_active() {
                        break;
                    }
                    Self::apply_upstream(id, conn, routing, event);
                }
            }
            Err(e) => {
                warn!(conn = %id, error = %e, "Upstream open failed");
                conn.teardown(id);
                conn.emit(id, ServerEvent::from(&RelayError::UpstreamOpen(e.to_string())));
            }
        }
    }

    fn handle_upstream(&mut self, id: ConnectionId, epoch: u64, event: UpstreamEvent) {
        let routing = self.routing;
        let current = self
            .connections
            .get_mut(&id)
            .filter(|conn| conn.epoch == epoch);

        let Some(conn) = current else {
            debug!(conn = %id, epoch, "Ignoring stale upstream event");
            return;
        };

        match conn.state {
            ConnectionState::Connecting => {
                debug!(conn = %id, epoch, "Holding upstream event until the open completes");
                conn.held.push(event);
            }
            ConnectionState::Active => Self::apply_upstream(id, conn, routing, event),
            state => debug!(conn = %id, epoch, state = %state, "Ignoring upstream event"),
        }
    }

    fn apply_upstream(
        id: ConnectionId,
        conn: &mut Connection,
        routing: PartRouting,
        event: UpstreamEvent,
    ) {
        match event {
            UpstreamEvent::Content(content) => Self::route(id, conn, routing, content),
            UpstreamEvent::Error(message) => {
                warn!(conn = %id, error = %message, "Upstream session failed");
                conn.emit(id, ServerEvent::from(&RelayError::UpstreamRuntime(message)));
                conn.teardown(id);
            }
            UpstreamEvent::Closed(reason) => {
                info!(conn = %id, reason = %reason, "Upstream session closed");
                conn.teardown(id);
                conn.emit(id, ServerEvent::closed(reason));
            }
        }
    }

    fn route(id: ConnectionId, conn: &Connection, routing: PartRouting, content: ServerContent) {
        let mut parts = content.parts.into_iter();

        match routing {
            PartRouting::FirstOnly => {
                if let Some(first) = parts.next() {
                    conn.emit(id, first.into());
                }
                let dropped = parts.count();
                if dropped > 0 {
                    warn!(conn = %id, dropped, "Dropping extra parts of a server message");
                }
            }
            PartRouting::All => {
                for part in parts {
                    conn.emit(id, part.into());
                }
            }
        }

        if content.turn_complete {
            conn.emit(id, ServerEvent::TurnComplete);
        }
    }

    fn handle_disconnected(&mut self, id: ConnectionId) {
        let Some(mut conn) = self.connections.remove(&id) else {
            debug!(conn = %id, "Disconnect for unknown connection");
            return;
        };

        if conn.state.is_active() {
            conn.set_state(id, ConnectionState::Closing);
        }
        if conn.discard_session() {
            info!(conn = %id, "Closed upstream session of disconnected client");
        }
        conn.set_state(id, ConnectionState::Closed);

        info!(conn = %id, total = self.connections.len(), "Connection removed");
    }

    fn close_all(&mut self) {
        for (id, mut conn) in self.connections.drain() {
            if conn.discard_session() {
                debug!(conn = %id, "Closed upstream session on shutdown");
            }
        }
    }
}
