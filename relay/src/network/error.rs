/// Network error types for WebSocket communication
///
/// Shared by the client-facing transport server and the upstream adapter.
use thiserror::Error;

/// Network-related errors
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Failed to connect to server
    #[error("Failed to connect to server: {0}")]
    ConnectionFailed(String),

    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// WebSocket protocol error
    #[error("WebSocket protocol error: {0}")]
    ProtocolError(String),

    /// Connection timeout
    #[error("Connection timeout after {0}ms")]
    Timeout(u64),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    /// Failed to serialize or parse a message
    #[error("Failed to serialize message: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Connection closed unexpectedly
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Upstream refused the session during setup
    #[error("Session rejected: {0}")]
    Rejected(String),

    /// Server returned an error message
    #[error("Server error: {0}")]
    ServerError(String),

    /// Socket-level I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;
