/// WebSocket-backed implementation of the upstream session traits
use crate::network::connection::{LiveConnection, UpstreamConfig};
use crate::network::error::{NetworkError, NetworkResult};
use crate::network::tasks::{Outbound, receiver_task, sender_task};
use crate::network::upstream::{
    UpstreamConnector, UpstreamContent, UpstreamListener, UpstreamSession,
};
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Opens [`LiveSession`]s against the configured service
#[derive(Debug, Clone)]
pub struct LiveConnector {
    config: UpstreamConfig,
}

impl LiveConnector {
    /// Create a connector for `config`
    pub fn new(config: UpstreamConfig) -> Self {
        Self { config }
    }

    /// Connector configuration
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }
}

impl UpstreamConnector for LiveConnector {
    fn open(
        &self,
        listener: UpstreamListener,
    ) -> BoxFuture<'static, NetworkResult<Box<dyn UpstreamSession>>> {
        let config = self.config.clone();

        Box::pin(async move {
            let connection = LiveConnection::connect(&config).await?;
            let session: Box<dyn UpstreamSession> = Box::new(LiveSession::spawn(connection, listener));
            Ok(session)
        })
    }
}

/// One open upstream session
///
/// Owns the writer and reader tasks. `send` only queues; the writer task
/// does the network I/O.
pub struct LiveSession {
    outbound_tx: Option<mpsc::UnboundedSender<Outbound>>,
    receiver_handle: Option<JoinHandle<()>>,
}

impl LiveSession {
    fn spawn(connection: LiveConnection, listener: UpstreamListener) -> Self {
        let (writer, reader) = connection.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let error_listener = listener.clone();
        tokio::spawn(async move {
            if let Err(e) = sender_task(writer, outbound_rx).await {
                error!("Upstream sender task failed: {}", e);
                error_listener.on_error(e.to_string());
            }
        });

        let receiver_handle = tokio::spawn(receiver_task(reader, listener));

        info!("Upstream session tasks running");

        Self {
            outbound_tx: Some(outbound_tx),
            receiver_handle: Some(receiver_handle),
        }
    }
}

impl UpstreamSession for LiveSession {
    fn send(&mut self, content: UpstreamContent) -> NetworkResult<()> {
        let tx = self.outbound_tx.as_ref().ok_or(NetworkError::ConnectionClosed)?;
        tx.send(Outbound::Content(content))
            .map_err(|_| NetworkError::ConnectionClosed)
    }

    fn close(&mut self) {
        let Some(tx) = self.outbound_tx.take() else {
            return;
        };

        debug!("Closing upstream session");
        let _ = tx.send(Outbound::Close);

        if let Some(handle) = self.receiver_handle.take() {
            handle.abort();
        }
    }

    fn is_closed(&self) -> bool {
        self.outbound_tx.is_none()
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}
