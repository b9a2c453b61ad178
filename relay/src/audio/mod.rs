/// Microphone capture (host audio device)
#[cfg(feature = "device")]
pub mod capture;

/// PCM sample conversion and transport encoding
pub mod codec;

/// Audio-related error types
pub mod error;

/// Speaker output (host audio device)
#[cfg(feature = "device")]
pub mod output;

/// Capture pipeline: framing, resampling, encoding
pub mod pipeline;

/// Sequential playback queue
pub mod playback;

/// Nearest-neighbour resampling
pub mod resampler;

// Re-export commonly used types
#[cfg(feature = "device")]
pub use capture::AudioCapture;
pub use codec::{
    EncodedChunk, bytes_to_pcm16, decode_from_text, encode_to_text, floats_to_pcm16,
    parse_sample_rate, pcm_mime_type, pcm16_to_bytes, pcm16_to_floats,
};
pub use error::{AudioError, AudioResult};
#[cfg(feature = "device")]
pub use output::DeviceSink;
pub use pipeline::{
    AudioFrame, CaptureConfig, CapturePipeline, FrameAssembler, FrameEncoder, SampleSender,
    SampleSource,
};
pub use playback::{AudioSink, PacedSink, PlaybackEvent, PlaybackQueue, PlaybackState};
pub use resampler::AudioResampler;
