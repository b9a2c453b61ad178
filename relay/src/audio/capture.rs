use crate::audio::error::{AudioError, AudioResult};
use crate::audio::pipeline::{SampleSender, SampleSource};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use tracing::{debug, error, info, warn};

/// Microphone capture through the host's default audio API
///
/// Interleaved device frames are averaged down to mono and each callback
/// block is moved into the pipeline's `SampleSender`.
pub struct AudioCapture {
    /// The audio input stream (None when stopped)
    stream: Option<Stream>,
    /// Sample rate of the input device
    sample_rate: u32,
    /// Number of channels
    channels: u16,
    /// Device being used for capture
    device: Device,
    /// Stream configuration
    config: StreamConfig,
}

impl AudioCapture {
    /// Open an input device
    ///
    /// # Arguments
    /// * `device_name` - Optional device name. If None, uses the default input device.
    ///
    /// # Errors
    /// Returns `AudioError::DeviceNotFound` if no matching device is available.
    pub fn new(device_name: Option<&str>) -> AudioResult<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| AudioError::StreamBuildFailed(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or(AudioError::DeviceNotFound)?,
            None => host
                .default_input_device()
                .ok_or(AudioError::DeviceNotFound)?,
        };

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio input device: {}", device_name);

        let config = device
            .default_input_config()
            .map_err(|e| AudioError::StreamBuildFailed(e.to_string()))?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        info!("Device config: {} Hz, {} channels", sample_rate, channels);

        let stream_config = StreamConfig {
            channels,
            sample_rate: config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            stream: None,
            sample_rate,
            channels,
            device,
            config: stream_config,
        })
    }

    /// Get the number of channels
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Check if capture is currently active
    pub fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

impl SampleSource for AudioCapture {
    fn start(&mut self, sender: SampleSender) -> AudioResult<()> {
        if self.stream.is_some() {
            warn!("Audio capture already started");
            return Ok(());
        }

        info!("Starting audio capture");

        let channels = self.channels.max(1) as usize;

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let block: Vec<f32> = if channels == 1 {
                        data.to_vec()
                    } else {
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                            .collect()
                    };
                    // Unbounded hand-off: never blocks the audio thread.
                    sender.on_samples(block);
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildFailed(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.stream = Some(stream);
        info!("Audio capture started successfully");

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            info!("Stopping audio capture");
            drop(stream);
            debug!("Audio capture stopped");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
