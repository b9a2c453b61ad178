//! Client transport protocol
//!
//! JSON objects tagged by `event`, one per WebSocket text frame.
//!
//! ```text
//! client -> relay   start-session | send-text | send-audio-chunk | end-session
//! relay  -> client  session-started | session-error | session-closed
//!                   text-part | audio-part | turn-complete
//! ```

use serde::{Deserialize, Serialize};

use crate::audio::codec::EncodedChunk;
use crate::network::upstream::{UpstreamContent, UpstreamPart};
use crate::relay::error::RelayError;
use crate::utils::error::{AppError, ErrorCode, ErrorContext};

/// Events sent by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Open an upstream session
    StartSession,

    /// Forward a user text turn
    SendText { text: String },

    /// Forward one frame of microphone audio (`data`, `mimeType`)
    SendAudioChunk(EncodedChunk),

    /// Close the upstream session
    EndSession,
}

impl ClientEvent {
    /// Event name (for logging)
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartSession => "start-session",
            Self::SendText { .. } => "send-text",
            Self::SendAudioChunk(_) => "send-audio-chunk",
            Self::EndSession => "end-session",
        }
    }

    /// Content to forward upstream, if this event carries any
    pub fn into_content(self) -> Option<UpstreamContent> {
        match self {
            Self::SendText { text } => Some(UpstreamContent::Text(text)),
            Self::SendAudioChunk(chunk) => Some(UpstreamContent::Audio(chunk)),
            Self::StartSession | Self::EndSession => None,
        }
    }
}

/// Events sent to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Upstream session open; parts may follow
    SessionStarted,

    /// Something failed; the connection stays usable
    SessionError { message: String, code: ErrorCode },

    /// Upstream session closed
    SessionClosed { reason: String },

    /// Model text
    TextPart { text: String },

    /// Model audio
    AudioPart { audio: EncodedChunk },

    /// The model finished its turn
    TurnComplete,
}

impl ServerEvent {
    /// `session-error` with an explicit code
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::SessionError {
            message: message.into(),
            code,
        }
    }

    /// `session-closed`
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::SessionClosed {
            reason: reason.into(),
        }
    }

    /// Event name (for logging)
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session-started",
            Self::SessionError { .. } => "session-error",
            Self::SessionClosed { .. } => "session-closed",
            Self::TextPart { .. } => "text-part",
            Self::AudioPart { .. } => "audio-part",
            Self::TurnComplete => "turn-complete",
        }
    }
}

impl From<ErrorContext> for ServerEvent {
    fn from(ctx: ErrorContext) -> Self {
        Self::error(ctx.code, ctx.message)
    }
}

impl From<&AppError> for ServerEvent {
    fn from(err: &AppError) -> Self {
        Self::from(err.context())
    }
}

impl From<&RelayError> for ServerEvent {
    fn from(err: &RelayError) -> Self {
        Self::from(&AppError::Relay(err.clone()))
    }
}

impl From<UpstreamPart> for ServerEvent {
    fn from(part: UpstreamPart) -> Self {
        match part {
            UpstreamPart::Text(text) => Self::TextPart { text },
            UpstreamPart::InlineAudio(audio) => Self::AudioPart { audio },
        }
    }
}
