use thiserror::Error;

use crate::utils::error::ErrorCode;

/// Session relay errors
///
/// All of these are reported to the client as `session-error` and never
/// stop the relay.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// `start-session` while a session exists or is opening
    #[error("A session is already active on this connection")]
    SessionAlreadyActive,

    /// Content sent without an open session
    #[error("No active session on this connection")]
    NoActiveSession,

    /// Upstream refused or failed to open
    #[error("Failed to open upstream session: {0}")]
    UpstreamOpen(String),

    /// Open session failed
    #[error("Upstream session failed: {0}")]
    UpstreamRuntime(String),
}

impl RelayError {
    /// Error code carried in `session-error`
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::SessionAlreadyActive => ErrorCode::SessionAlreadyActive,
            RelayError::NoActiveSession => ErrorCode::NoActiveSession,
            RelayError::UpstreamOpen(_) => ErrorCode::UpstreamOpenFailed,
            RelayError::UpstreamRuntime(_) => ErrorCode::UpstreamRuntimeError,
        }
    }
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
