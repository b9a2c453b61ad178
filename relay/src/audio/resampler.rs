use crate::audio::error::{AudioError, AudioResult};
use tracing::{debug, info};

/// Nearest-neighbour sample rate converter
///
/// Output sample `i` is input sample `floor(i * input_rate / output_rate)`.
/// There is no interpolation and no anti-aliasing filter: downsampling folds
/// energy above the new Nyquist frequency back into the band. This keeps the
/// conversion allocation-light and latency-free, which is what a live voice
/// uplink needs; speech stays intelligible at 16 kHz.
///
/// When the two rates are equal the input passes through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioResampler {
    /// Input sample rate
    input_rate: u32,
    /// Output sample rate
    output_rate: u32,
}

impl AudioResampler {
    /// Create a new audio resampler
    ///
    /// # Errors
    /// Returns `AudioError::InvalidSampleRate` if either rate is zero.
    ///
    /// # Example
    /// ```
    /// use voice_relay_lib::audio::resampler::AudioResampler;
    ///
    /// let resampler = AudioResampler::new(48000, 16000).unwrap();
    /// assert_eq!(resampler.process(&[0.0; 480]).len(), 160);
    /// ```
    pub fn new(input_rate: u32, output_rate: u32) -> AudioResult<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(AudioError::InvalidSampleRate(format!(
                "{} Hz -> {} Hz",
                input_rate, output_rate
            )));
        }

        info!("Creating resampler: {} Hz -> {} Hz", input_rate, output_rate);

        if input_rate == output_rate {
            info!("Input and output rates are the same, using passthrough mode");
        }

        Ok(Self {
            input_rate,
            output_rate,
        })
    }

    /// Resample one block
    ///
    /// The output holds `floor(len * output_rate / input_rate)` samples.
    pub fn process(&self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return input.to_vec();
        }

        let out_len = self.output_len(input.len());
        let input_rate = self.input_rate as u64;
        let output_rate = self.output_rate as u64;

        let output: Vec<f32> = (0..out_len as u64)
            .map(|i| (i * input_rate / output_rate) as usize)
            .map(|idx| input[idx.min(input.len() - 1)])
            .collect();

        debug!("Resampled {} -> {} samples", input.len(), output.len());
        output
    }

    /// Number of output samples produced for `input_len` input samples
    pub fn output_len(&self, input_len: usize) -> usize {
        if self.is_passthrough() {
            return input_len;
        }
        (input_len as u64 * self.output_rate as u64 / self.input_rate as u64) as usize
    }

    /// Whether input and output rates match
    pub fn is_passthrough(&self) -> bool {
        self.input_rate == self.output_rate
    }

    /// Get the input sample rate
    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Get the output sample rate
    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }
}
