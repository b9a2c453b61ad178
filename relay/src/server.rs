//! Client-facing WebSocket server
//!
//! Each accepted socket becomes one relay connection. A reader loop parses
//! client frames into [`ClientEvent`]s for the relay; a writer task drains
//! the connection's outbound channel into text frames.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::network::error::{NetworkError, NetworkResult};
use crate::relay::{ClientEvent, ConnectionId, RelayHandle, ServerEvent};
use crate::utils::error::AppError;

/// Pause after a failed accept
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts client connections and hands them to the relay
pub struct RelayServer {
    listener: TcpListener,
    relay: RelayHandle,
    next_id: u64,
}

impl RelayServer {
    /// Bind the listen socket
    pub async fn bind(addr: SocketAddr, relay: RelayHandle) -> NetworkResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Relay server listening");

        Ok(Self {
            listener,
            relay,
            next_id: 1,
        })
    }

    /// Actual bound address
    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the relay stops
    ///
    /// Failed accepts (for example when out of file descriptors) are logged
    /// and retried after [`ACCEPT_BACKOFF`]; they never stop the server.
    pub async fn run(mut self) -> NetworkResult<()> {
        loop {
            let (stream, peer) = accept_with_retry(|| self.listener.accept()).await;

            if self.relay.is_closed() {
                info!("Relay stopped, no longer accepting connections");
                return Ok(());
            }

            let id = ConnectionId::new(self.next_id);
            self.next_id += 1;

            debug!(conn = %id, peer = %peer, "TCP connection accepted");
            tokio::spawn(serve_connection(stream, peer, id, self.relay.clone()));
        }
    }
}

/// Call `accept` until it succeeds, pausing after each failure
async fn accept_with_retry<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                warn!(error = %e, "Accept failed, retrying");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Parse one client text frame
pub fn parse_client_event(text: &str) -> Result<ClientEvent, AppError> {
    serde_json::from_str(text).map_err(|e| AppError::InvalidMessage(e.to_string()))
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, id: ConnectionId, relay: RelayHandle) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(conn = %id, peer = %peer, error = %NetworkError::from(e), "WebSocket handshake failed");
            return;
        }
    };

    info!(conn = %id, peer = %peer, "Client connected");

    let (mut ws_writer, mut ws_reader) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();

    if !relay.connect(id, outbound_tx.clone()) {
        return;
    }

    let writer = tokio::spawn(async move {
        let mut sent = 0u64;

        while let Some(event) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!(conn = %id, error = %e, "Failed to serialize event");
                    continue;
                }
            };

            if let Err(e) = ws_writer.send(Message::Text(json.into())).await {
                debug!(conn = %id, error = %e, "Client socket write failed");
                break;
            }
            sent += 1;
        }

        let _ = ws_writer.close().await;
        debug!(conn = %id, sent, "Writer finished");
    });

    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match parse_client_event(text.as_str()) {
                Ok(event) => {
                    if !relay.client_event(id, event) {
                        break;
                    }
                }
                Err(err) => reject(id, &outbound_tx, &err),
            },
            Ok(Message::Binary(_)) => {
                let err = AppError::InvalidMessage("binary frames are not supported".to_string());
                reject(id, &outbound_tx, &err);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn = %id, error = %e, "Client socket read failed");
                break;
            }
        }
    }

    relay.disconnect(id);
    drop(outbound_tx);

    if let Err(e) = writer.await {
        warn!(conn = %id, error = %e, "Writer task failed");
    }

    info!(conn = %id, "Client disconnected");
}

/// Answer an unusable client frame with a `session-error`
fn reject(id: ConnectionId, outbound: &mpsc::UnboundedSender<ServerEvent>, err: &AppError) {
    let ctx = err.context();
    warn!(
        conn = %id,
        code = ?ctx.code,
        detail = ctx.detail.as_deref().unwrap_or_default(),
        "Rejected client message"
    );
    let _ = outbound.send(ServerEvent::from(ctx));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::ErrorCode;

    #[test]
    fn test_parse_client_event() {
        let event = parse_client_event(r#"{"event":"send-text","text":"hi"}"#).unwrap();
        assert_eq!(event, ClientEvent::SendText { text: "hi".to_string() });
    }

    #[tokio::test]
    async fn test_accept_errors_are_retried() {
        let attempts = std::cell::Cell::new(0);

        let accepted = accept_with_retry(|| {
            attempts.set(attempts.get() + 1);
            let attempt = attempts.get();
            async move {
                if attempt < 3 {
                    Err(std::io::Error::other("too many open files"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(accepted, 3);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_parse_invalid_message() {
        let err = parse_client_event("not json").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMessage);

        let err = parse_client_event(r#"{"event":"send-text"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMessage);
    }
}
