/// WebSocket connection to the upstream live-conversation API
///
/// Handles the connect + setup handshake. After `connect` returns, the
/// service has accepted the session and the stream can be split into
/// independent reader and writer halves.
use crate::network::error::{NetworkError, NetworkResult};
use crate::network::messages::{ServerMessage, SetupMessage};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest},
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of the WebSocket stream
pub type WsWriter = SplitSink<WsStream, Message>;

/// Read half of the WebSocket stream
pub type WsReader = SplitStream<WsStream>;

/// Default service endpoint
pub const DEFAULT_UPSTREAM_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Configuration for upstream connections
///
/// # Example
/// ```
/// use voice_relay_lib::network::UpstreamConfig;
///
/// let config = UpstreamConfig::new("secret")
///     .with_model("models/custom")
///     .with_timeout(5000);
///
/// assert!(config.build_url().unwrap().ends_with("?key=secret"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// WebSocket endpoint
    pub url: String,

    /// API key, sent as the `key` query parameter
    pub api_key: String,

    /// Model resource name
    pub model: String,

    /// Modalities the model answers in
    pub response_modalities: Vec<String>,

    /// Optional system prompt
    pub system_instruction: Option<String>,

    /// Connect + setup timeout in milliseconds
    pub timeout_ms: u64,
}

impl UpstreamConfig {
    /// Create a new configuration with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Set the endpoint URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the system prompt
    pub fn with_system_instruction(mut self, text: impl Into<String>) -> Self {
        self.system_instruction = Some(text.into());
        self
    }

    /// Set connection timeout in milliseconds
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Build the WebSocket URL with query parameters
    ///
    /// # Errors
    /// `NetworkError::InvalidConfig` if the URL is not a ws:// or wss:// URL.
    pub fn build_url(&self) -> NetworkResult<String> {
        if !(self.url.starts_with("wss://") || self.url.starts_with("ws://")) {
            return Err(NetworkError::InvalidConfig(format!(
                "Upstream URL must use ws:// or wss://: {}",
                self.url
            )));
        }

        if self.api_key.is_empty() {
            return Ok(self.url.clone());
        }

        let separator = if self.url.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}key={}", self.url, separator, self.api_key))
    }

    /// Build the setup message for this configuration
    pub fn setup_message(&self) -> SetupMessage {
        let setup = SetupMessage::new(&self.model).with_modalities(self.response_modalities.clone());
        match &self.system_instruction {
            Some(text) => setup.with_system_instruction(text),
            None => setup,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            response_modalities: vec!["AUDIO".to_string()],
            system_instruction: None,
            timeout_ms: 10000,
        }
    }
}

/// Open, set-up WebSocket connection to the service
pub struct LiveConnection {
    ws_stream: WsStream,
}

impl LiveConnection {
    /// Connect and complete the setup handshake
    ///
    /// # Errors
    /// Returns `NetworkError` if connecting, authenticating, or setup fails,
    /// or if the whole handshake exceeds the configured timeout.
    pub async fn connect(config: &UpstreamConfig) -> NetworkResult<Self> {
        info!(model = %config.model, "Connecting to upstream service");

        let url = config.build_url()?;
        let request = url
            .as_str()
            .into_client_request()
            .map_err(|e| NetworkError::InvalidConfig(format!("Invalid URL: {}", e)))?;

        let timeout = tokio::time::Duration::from_millis(config.timeout_ms);

        tokio::time::timeout(timeout, Self::handshake(request, config))
            .await
            .map_err(|_| NetworkError::Timeout(config.timeout_ms))?
    }

    async fn handshake(
        request: tokio_tungstenite::tungstenite::handshake::client::Request,
        config: &UpstreamConfig,
    ) -> NetworkResult<Self> {
        let (mut ws_stream, response) = connect_async(request).await.map_err(|e| {
            if let tokio_tungstenite::tungstenite::Error::Http(resp) = &e {
                if resp.status() == 401 || resp.status() == 403 {
                    return NetworkError::AuthenticationFailed;
                }
            }
            NetworkError::ConnectionFailed(e.to_string())
        })?;

        debug!("Upstream socket open (status: {})", response.status());

        let setup = serde_json::to_string(&config.setup_message())?;
        ws_stream.send(Message::Text(setup.into())).await?;

        loop {
            match ws_stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if Self::accept_setup_reply(text.as_bytes())? {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if Self::accept_setup_reply(&data)? {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed during setup".to_string());
                    return Err(NetworkError::Rejected(reason));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(NetworkError::WebSocketError(e)),
                None => return Err(NetworkError::ConnectionClosed),
            }
        }

        info!("Upstream session accepted");
        Ok(Self { ws_stream })
    }

    /// `Ok(true)` once setup is confirmed; service errors become `Rejected`
    fn accept_setup_reply(payload: &[u8]) -> NetworkResult<bool> {
        let message: ServerMessage = serde_json::from_slice(payload)?;

        if message.is_setup_complete() {
            return Ok(true);
        }
        if let Some(error) = message.error {
            return Err(NetworkError::Rejected(error.message));
        }

        warn!("Ignoring message received before setup completed");
        Ok(false)
    }

    /// Split the connection into separate read and write halves
    pub fn split(self) -> (WsWriter, WsReader) {
        let (writer, reader) = self.ws_stream.split();
        (writer, reader)
    }
}
