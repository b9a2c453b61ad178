//! Speaker output through the host's default audio device
//!
//! The cpal stream lives on its own thread (streams are not `Send` on every
//! platform). Decoded chunks are pushed into a lock-free ring buffer that the
//! output callback drains. `play` resolves once the chunk is queued and the
//! unplayed backlog has fallen to a low-water mark, so the next chunk is
//! already in the ring when this one ends. `drain` waits for the ring to
//! empty completely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{
    HeapRb,
    traits::{Consumer, Producer, Split},
};
use tracing::{debug, error, info};

use crate::audio::error::{AudioError, AudioResult};
use crate::audio::playback::AudioSink;
use crate::audio::resampler::AudioResampler;

/// Ring capacity in samples (about 2.7 s at 48 kHz)
const RING_CAPACITY: usize = 1 << 17;

/// Poll interval while waiting for the device to catch up
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Backlog (in device samples) at which `play` hands back control: 50 ms
pub fn low_water_mark(device_rate: u32) -> u64 {
    u64::from(device_rate / 20).max(1)
}

/// Samples pushed through `target` that the device has not consumed yet
fn backlog(target: u64, consumed: u64) -> u64 {
    target.saturating_sub(consumed)
}

/// `AudioSink` backed by the default output device
pub struct DeviceSink {
    producer: Mutex<ringbuf::HeapProd<f32>>,
    pushed: AtomicU64,
    consumed: Arc<AtomicU64>,
    device_rate: u32,
    shutdown: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl DeviceSink {
    /// Open the default output device
    ///
    /// # Errors
    /// Returns `AudioError::DeviceNotFound` or a stream error if the device
    /// cannot be opened.
    pub fn open() -> AudioResult<Self> {
        let rb = HeapRb::<f32>::new(RING_CAPACITY);
        let (producer, consumer) = rb.split();
        let consumed = Arc::new(AtomicU64::new(0));

        let (ready_tx, ready_rx) = std_mpsc::channel::<AudioResult<u32>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let consumed_cb = Arc::clone(&consumed);

        std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match build_stream(consumer, consumed_cb) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    debug!("Output stream closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| AudioError::StreamBuildFailed(e.to_string()))?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamBuildFailed("output thread exited".to_string()))??;

        info!("Output device ready at {} Hz", device_rate);

        Ok(Self {
            producer: Mutex::new(producer),
            pushed: AtomicU64::new(0),
            consumed,
            device_rate,
            shutdown: Mutex::new(Some(shutdown_tx)),
        })
    }

    /// Device sample rate
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

fn build_stream(
    consumer: ringbuf::HeapCons<f32>,
    consumed: Arc<AtomicU64>,
) -> AudioResult<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::DeviceNotFound)?;

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::StreamBuildFailed(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let sample_format = supported.sample_format();
    let config = supported.config();

    info!(
        "Using audio output device: {} ({} Hz, {} channels, {:?})",
        device.name().unwrap_or_else(|_| "Unknown".to_string()),
        sample_rate,
        config.channels,
        sample_format
    );

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_typed_stream::<f32>(&device, &config, consumer, consumed),
        cpal::SampleFormat::I16 => build_typed_stream::<i16>(&device, &config, consumer, consumed),
        cpal::SampleFormat::U16 => build_typed_stream::<u16>(&device, &config, consumer, consumed),
        other => Err(AudioError::StreamBuildFailed(format!(
            "unsupported output sample format {:?}",
            other
        ))),
    }?;

    stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok((stream, sample_rate))
}

fn build_typed_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: ringbuf::HeapCons<f32>,
    consumed: Arc<AtomicU64>,
) -> AudioResult<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let popped = fill_frames(data, channels, || consumer.try_pop());
                consumed.fetch_add(popped, Ordering::Release);
            },
            move |err| {
                error!("Audio output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildFailed(e.to_string()))
}

/// Copy mono samples into every channel of each frame, padding with silence
///
/// Returns how many samples were taken from `next`.
fn fill_frames<T>(data: &mut [T], channels: usize, mut next: impl FnMut() -> Option<f32>) -> u64
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    let mut popped = 0u64;
    for frame in data.chunks_mut(channels.max(1)) {
        let sample = match next() {
            Some(s) => {
                popped += 1;
                T::from_sample(s)
            }
            None => T::EQUILIBRIUM,
        };
        frame.fill(sample);
    }
    popped
}

impl AudioSink for DeviceSink {
    async fn play(&self, samples: Vec<f32>, sample_rate: u32) -> AudioResult<()> {
        let samples = AudioResampler::new(sample_rate, self.device_rate)?.process(&samples);
        let target = self.pushed.fetch_add(samples.len() as u64, Ordering::AcqRel)
            + samples.len() as u64;

        let mut offset = 0;
        while offset < samples.len() {
            let written = {
                let mut producer = self
                    .producer
                    .lock()
                    .map_err(|_| AudioError::PlaybackFailed("producer poisoned".to_string()))?;
                producer.push_slice(&samples[offset..])
            };
            offset += written;
            if offset < samples.len() {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        }

        let low_water = low_water_mark(self.device_rate);
        while backlog(target, self.consumed.load(Ordering::Acquire)) > low_water {
            tokio::time::sleep(DRAIN_POLL).await;
        }

        Ok(())
    }

    async fn drain(&self) {
        let target = self.pushed.load(Ordering::Acquire);
        while backlog(target, self.consumed.load(Ordering::Acquire)) > 0 {
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        if let Ok(mut shutdown) = self.shutdown.lock() {
            if let Some(tx) = shutdown.take() {
                let _ = tx.send(());
            }
        }
    }
}
