//! PCM sample conversion and text-safe transport encoding
//!
//! Everything here is a pure function. Samples travel as 16-bit signed
//! little-endian PCM, base64 encoded, tagged with a MIME type of the form
//! `audio/pcm;rate=16000`.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::audio::error::{AudioError, AudioResult};

/// MIME prefix used for every PCM chunk on the wire
pub const PCM_MIME_PREFIX: &str = "audio/pcm";

/// An encoded chunk of PCM audio ready for transport
///
/// `data` holds base64 of little-endian i16 samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedChunk {
    /// Base64-encoded PCM bytes
    pub data: String,
    /// MIME tag carrying the sample rate, e.g. `audio/pcm;rate=24000`
    pub mime_type: String,
}

impl EncodedChunk {
    /// Wrap already-encoded data with a MIME tag
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Encode i16 samples recorded at `sample_rate`
    pub fn from_pcm16(samples: &[i16], sample_rate: u32) -> Self {
        Self {
            data: encode_to_text(&pcm16_to_bytes(samples)),
            mime_type: pcm_mime_type(sample_rate),
        }
    }

    /// Decode back into i16 samples
    ///
    /// # Errors
    /// `AudioError::MalformedEncoding` on bad base64 or an odd byte count.
    pub fn to_pcm16(&self) -> AudioResult<Vec<i16>> {
        let bytes = decode_from_text(&self.data)?;
        bytes_to_pcm16(&bytes)
    }

    /// Sample rate from the MIME tag, if present
    pub fn sample_rate(&self) -> Option<u32> {
        parse_sample_rate(&self.mime_type)
    }
}

/// Convert f32 samples (range: -1.0 to 1.0) to i16 PCM
///
/// Negative values scale by 32768 and non-negative values by 32767, so both
/// ends of the range land exactly on `i16::MIN` and `i16::MAX` without
/// overflow. The cast truncates toward zero.
pub fn floats_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let clamped = sample.clamp(-1.0, 1.0);
            if clamped < 0.0 {
                (clamped * 32768.0) as i16
            } else {
                (clamped * 32767.0) as i16
            }
        })
        .collect()
}

/// Convert i16 PCM back to f32 samples
pub fn pcm16_to_floats(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Convert i16 samples to little-endian bytes
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Convert little-endian bytes to i16 samples
///
/// # Errors
/// `AudioError::MalformedEncoding` if the byte count is odd.
pub fn bytes_to_pcm16(bytes: &[u8]) -> AudioResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::MalformedEncoding(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Base64 encode bytes
pub fn encode_to_text(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Base64 decode text
///
/// # Errors
/// `AudioError::MalformedEncoding` on an invalid alphabet or padding.
pub fn decode_from_text(text: &str) -> AudioResult<Vec<u8>> {
    Ok(STANDARD.decode(text)?)
}

/// Build the MIME tag for PCM at `sample_rate`
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("{};rate={}", PCM_MIME_PREFIX, sample_rate)
}

/// Extract `rate=N` from a MIME tag
pub fn parse_sample_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .filter(|&rate| rate > 0)
}
