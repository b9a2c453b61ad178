/// Network communication and WebSocket handling
///
/// This module provides the upstream session abstraction and its WebSocket
/// adapter for the live-conversation service.

/// WebSocket connection and setup handshake
pub mod connection;

/// Network error types
pub mod error;

/// WebSocket-backed upstream sessions
pub mod live;

/// Upstream wire message definitions
pub mod messages;

/// Async tasks for concurrent send/receive operations
pub mod tasks;

/// Upstream session traits and event types
pub mod upstream;

// Re-export commonly used types
pub use connection::{LiveConnection, UpstreamConfig, WsReader, WsWriter};
pub use error::{NetworkError, NetworkResult};
pub use live::{LiveConnector, LiveSession};
pub use messages::{ClientMessage, ServerMessage, SetupMessage};
pub use upstream::{
    ServerContent, UpstreamConnector, UpstreamContent, UpstreamEvent, UpstreamListener,
    UpstreamPart, UpstreamSession,
};
