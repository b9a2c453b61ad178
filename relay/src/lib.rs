/// Audio processing modules
pub mod audio;

/// Relay configuration
pub mod config;

/// Conversation history
pub mod conversation;

/// Upstream network communication
pub mod network;

/// Session relay
pub mod relay;

/// Client-facing WebSocket server
pub mod server;

/// Utility modules
pub mod utils;
