//! Global error handling
//!
//! Provides the application-wide error type and the stable error codes sent
//! to clients.
//!
//! # Features
//!
//! - `AppError` aggregating every module error
//! - `ErrorCode` values carried in `session-error` events
//! - `ErrorContext` for logging and client display
//!
//! # Example
//!
//! ```
//! use voice_relay_lib::relay::RelayError;
//! use voice_relay_lib::utils::error::{AppError, ErrorCode};
//!
//! let err = AppError::from(RelayError::NoActiveSession);
//! assert_eq!(err.code(), ErrorCode::NoActiveSession);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::error::AudioError;
use crate::config::ConfigError;
use crate::network::error::NetworkError;
use crate::relay::RelayError;

/// Application error type
///
/// Aggregates all module errors behind one interface.
#[derive(Error, Debug)]
pub enum AppError {
    /// Audio error
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Relay error
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Config error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Client sent something the relay cannot parse
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),
}

/// Error codes
///
/// Stable identifiers clients can match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Audio errors
    /// Audio data was not valid base64 PCM
    AudioMalformed,
    /// Audio could not be played
    AudioPlaybackFailed,
    /// No audio device
    AudioDeviceNotFound,
    /// Audio stream failure
    AudioStreamError,

    // Network errors
    /// Connection failed
    NetworkConnectionFailed,
    /// Authentication failed (invalid API key)
    NetworkAuthFailed,
    /// Protocol error
    NetworkProtocolError,
    /// Connection timed out
    NetworkTimeout,

    // Relay errors
    /// `start-session` with a session already present
    SessionAlreadyActive,
    /// Content sent without a session
    NoActiveSession,
    /// Upstream session could not be opened
    UpstreamOpenFailed,
    /// Upstream session failed while open
    UpstreamRuntimeError,
    /// Client message could not be parsed
    InvalidMessage,

    // Config errors
    /// Config file could not be read
    ConfigLoadFailed,
    /// Config file is not valid
    ConfigInvalid,
    /// No API key configured
    ConfigMissingApiKey,

    // Generic errors
    /// Internal error
    InternalError,
    /// Operation timed out
    OperationTimeout,
    /// Unknown error
    Unknown,
}

/// Error context
///
/// Client-facing message plus detail for logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Error code
    pub code: ErrorCode,
    /// Short message
    pub message: String,
    /// Full error text (for logs)
    pub detail: Option<String>,
    /// Whether the caller can carry on
    pub recoverable: bool,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            recoverable: true,
        }
    }

    /// Set detail
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Mark as not recoverable
    pub fn not_recoverable(mut self) -> Self {
        self.recoverable = false;
        self
    }
}

impl AppError {
    /// Get error code
    pub fn code(&self) -> ErrorCode {
        match self {
            // Audio errors
            AppError::Audio(AudioError::MalformedEncoding(_)) => ErrorCode::AudioMalformed,
            AppError::Audio(AudioError::PlaybackFailed(_)) => ErrorCode::AudioPlaybackFailed,
            AppError::Audio(AudioError::DeviceNotFound) => ErrorCode::AudioDeviceNotFound,
            AppError::Audio(_) => ErrorCode::AudioStreamError,

            // Network errors
            AppError::Network(NetworkError::ConnectionFailed(_)) => {
                ErrorCode::NetworkConnectionFailed
            }
            AppError::Network(NetworkError::AuthenticationFailed) => ErrorCode::NetworkAuthFailed,
            AppError::Network(NetworkError::ProtocolError(_)) => ErrorCode::NetworkProtocolError,
            AppError::Network(NetworkError::SerializationError(_)) => {
                ErrorCode::NetworkProtocolError
            }
            AppError::Network(NetworkError::Timeout(_)) => ErrorCode::NetworkTimeout,
            AppError::Network(_) => ErrorCode::NetworkConnectionFailed,

            // Relay errors
            AppError::Relay(err) => err.code(),
            AppError::InvalidMessage(_) => ErrorCode::InvalidMessage,

            // Config errors
            AppError::Config(ConfigError::Io(_)) => ErrorCode::ConfigLoadFailed,
            AppError::Config(ConfigError::MissingApiKey) => ErrorCode::ConfigMissingApiKey,
            AppError::Config(_) => ErrorCode::ConfigInvalid,

            // Generic errors
            AppError::Internal(_) => ErrorCode::InternalError,
            AppError::Timeout(_) => ErrorCode::OperationTimeout,
        }
    }

    /// Get a short message suitable for clients
    pub fn user_message(&self) -> String {
        match self {
            AppError::Audio(AudioError::MalformedEncoding(_)) => {
                "Audio data could not be decoded".to_string()
            }
            AppError::Audio(AudioError::DeviceNotFound) => {
                "No audio device found, check your audio settings".to_string()
            }
            AppError::Audio(_) => "Audio error".to_string(),

            AppError::Network(NetworkError::AuthenticationFailed) => {
                "The upstream service rejected the API key".to_string()
            }
            AppError::Network(NetworkError::Timeout(_)) => {
                "The upstream service did not answer in time".to_string()
            }
            AppError::Network(_) => "Could not reach the upstream service".to_string(),

            AppError::Relay(err) => err.to_string(),
            AppError::InvalidMessage(_) => "Message could not be parsed".to_string(),

            AppError::Config(ConfigError::MissingApiKey) => {
                "No API key configured, set VOICE_RELAY_API_KEY".to_string()
            }
            AppError::Config(_) => "Configuration could not be loaded".to_string(),

            AppError::Internal(msg) => format!("Internal error: {}", msg),
            AppError::Timeout(ms) => format!("Operation timed out ({}ms)", ms),
        }
    }

    /// Get the full error context
    pub fn context(&self) -> ErrorContext {
        let ctx = ErrorContext::new(self.code(), self.user_message()).with_detail(self.to_string());

        if self.is_recoverable() {
            ctx
        } else {
            ctx.not_recoverable()
        }
    }

    /// Check if recoverable
    ///
    /// Only configuration and internal errors stop the process.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AppError::Config(_) | AppError::Internal(_))
    }
}

/// Application result type
pub type AppResult<T> = Result<T, AppError>;

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Internal(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }
}
