use thiserror::Error;

/// Audio-related errors
#[derive(Error, Debug)]
pub enum AudioError {
    /// Transported audio was not valid base64 or not whole 16-bit samples
    #[error("Malformed audio encoding: {0}")]
    MalformedEncoding(String),

    /// A chunk could not be rendered by the audio sink
    #[error("Playback failed: {0}")]
    PlaybackFailed(String),

    /// Sample rate of zero or a MIME tag without a usable rate
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(String),

    /// Frame size of zero
    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    /// Capture pipeline is already running
    #[error("Capture pipeline already running")]
    AlreadyRunning,

    /// No audio device found
    #[error("No audio device found")]
    DeviceNotFound,

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildFailed(String),

    /// Audio stream error
    #[error("Audio stream error: {0}")]
    StreamError(String),
}

impl From<base64::DecodeError> for AudioError {
    fn from(err: base64::DecodeError) -> Self {
        AudioError::MalformedEncoding(err.to_string())
    }
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
