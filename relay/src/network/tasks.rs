/// Async tasks for sending and receiving upstream WebSocket messages
///
/// One writer task and one reader task run per open upstream session.
use crate::network::connection::{WsReader, WsWriter};
use crate::network::error::{NetworkError, NetworkResult};
use crate::network::messages::{ClientMessage, ServerMessage};
use crate::network::upstream::{UpstreamContent, UpstreamEvent, UpstreamListener};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Commands accepted by the writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Forward content to the service
    Content(UpstreamContent),
    /// Send a close frame and stop
    Close,
}

/// Sender task that drains queued content into the WebSocket
///
/// Runs until a `Close` command arrives, the channel closes, or a send fails.
pub async fn sender_task(
    mut ws_writer: WsWriter,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) -> NetworkResult<()> {
    info!("Sender task started");

    let mut sent = 0u64;

    while let Some(command) = outbound_rx.recv().await {
        let content = match command {
            Outbound::Content(content) => content,
            Outbound::Close => {
                debug!("Close requested");
                break;
            }
        };

        let json = serde_json::to_string(&ClientMessage::from(content))?;

        ws_writer
            .send(Message::Text(json.into()))
            .await
            .map_err(NetworkError::WebSocketError)?;

        sent += 1;
        debug!("Upstream message #{} sent", sent);
    }

    info!("Sender task completed: {} messages sent", sent);

    if let Err(e) = ws_writer.close().await {
        warn!("Failed to close WebSocket writer: {}", e);
    }

    Ok(())
}

/// Receiver task that turns service messages into listener callbacks
///
/// Always finishes by reporting exactly one terminal event (`Error` or
/// `Closed`) unless the stream produced one itself.
pub async fn receiver_task(mut ws_reader: WsReader, listener: UpstreamListener) {
    info!("Receiver task started");

    let mut received = 0u64;

    while let Some(msg_result) = ws_reader.next().await {
        let payload = match msg_result {
            Ok(Message::Text(text)) => text.as_bytes().to_vec(),
            // The service may deliver JSON in binary frames.
            Ok(Message::Binary(data)) => data.to_vec(),
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "upstream closed".to_string());
                info!("Received close frame: {}", reason);
                listener.on_close(reason);
                return;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
            Err(e) => {
                error!("WebSocket error: {}", e);
                listener.on_error(e.to_string());
                return;
            }
        };

        let message: ServerMessage = match serde_json::from_slice(&payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping unparseable upstream message: {}", e);
                continue;
            }
        };

        received += 1;

        if let Some(event) = message.into_event() {
            let terminal = !matches!(event, UpstreamEvent::Content(_));
            listener.emit(event);
            if terminal {
                return;
            }
        }
    }

    info!("Receiver task completed: {} messages received", received);
    listener.on_close("upstream stream ended");
}
