use crate::audio::codec::{EncodedChunk, floats_to_pcm16};
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::resampler::AudioResampler;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default number of raw input samples per frame
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Default uplink sample rate
pub const DEFAULT_TARGET_RATE: u32 = 16000;

/// Capture pipeline configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Raw input samples per emitted frame
    pub frame_size: usize,
    /// Rate the source produces samples at
    pub source_rate: u32,
    /// Rate frames are sent at
    pub target_rate: u32,
}

impl CaptureConfig {
    /// Create a configuration for a source running at `source_rate`
    pub fn new(source_rate: u32) -> Self {
        Self {
            source_rate,
            ..Default::default()
        }
    }

    /// Set the frame size
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    /// Set the target rate
    pub fn with_target_rate(mut self, target_rate: u32) -> Self {
        self.target_rate = target_rate;
        self
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            source_rate: 48000,
            target_rate: DEFAULT_TARGET_RATE,
        }
    }
}

/// One frame of 16-bit PCM after resampling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Samples in arrival order
    pub samples: Vec<i16>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Encoding tag for every frame this pipeline produces
    pub const ENCODING: &'static str = "pcm_s16le";

    /// Encode into a transportable chunk
    pub fn encode(&self) -> EncodedChunk {
        EncodedChunk::from_pcm16(&self.samples, self.sample_rate)
    }
}

/// Cuts an arbitrary stream of sample blocks into fixed-size frames
///
/// Samples that do not yet fill a frame stay in the backlog until the next
/// block arrives.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    backlog: Vec<f32>,
}

impl FrameAssembler {
    /// # Errors
    /// Returns `AudioError::InvalidFrameSize` for a zero frame size.
    pub fn new(frame_size: usize) -> AudioResult<Self> {
        if frame_size == 0 {
            return Err(AudioError::InvalidFrameSize(frame_size));
        }

        Ok(Self {
            frame_size,
            backlog: Vec::with_capacity(frame_size * 2),
        })
    }

    /// Append a block and return every complete frame, oldest first
    pub fn push(&mut self, block: Vec<f32>) -> Vec<Vec<f32>> {
        if self.backlog.is_empty() && block.len() == self.frame_size {
            // Exact fit: hand the caller's buffer straight through.
            return vec![block];
        }

        self.backlog.extend_from_slice(&block);

        let mut frames = Vec::new();
        while self.backlog.len() >= self.frame_size {
            let rest = self.backlog.split_off(self.frame_size);
            frames.push(std::mem::replace(&mut self.backlog, rest));
        }
        frames
    }

    /// Samples waiting for the next frame
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    /// Drop the partial frame
    pub fn clear(&mut self) {
        self.backlog.clear();
    }

    /// Configured frame size
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

/// Resample → i16 conversion for single frames
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    resampler: AudioResampler,
}

impl FrameEncoder {
    /// # Errors
    /// Returns `AudioError::InvalidSampleRate` if either rate is zero.
    pub fn new(source_rate: u32, target_rate: u32) -> AudioResult<Self> {
        Ok(Self {
            resampler: AudioResampler::new(source_rate, target_rate)?,
        })
    }

    /// Convert a raw frame into an `AudioFrame` at the target rate
    pub fn convert(&self, frame: &[f32]) -> AudioFrame {
        let resampled = self.resampler.process(frame);
        AudioFrame {
            samples: floats_to_pcm16(&resampled),
            sample_rate: self.resampler.output_rate(),
        }
    }
}

/// Producer-side handle of a running capture pipeline
///
/// Cloneable and non-blocking, so it can live inside a real-time audio
/// callback. Blocks are moved into the pipeline, never copied.
#[derive(Debug, Clone)]
pub struct SampleSender {
    tx: mpsc::UnboundedSender<Vec<f32>>,
}

impl SampleSender {
    /// Hand a block of raw samples to the pipeline
    ///
    /// Returns `false` once the pipeline has stopped.
    pub fn on_samples(&self, block: Vec<f32>) -> bool {
        self.tx.send(block).is_ok()
    }
}

/// Anything that pushes raw sample blocks into a `SampleSender`
///
/// Implemented by the microphone capture behind the `device` feature.
/// Not `Send`: host audio streams are usually pinned to their thread.
pub trait SampleSource {
    /// Begin delivering blocks
    fn start(&mut self, sender: SampleSender) -> AudioResult<()>;

    /// Stop delivering blocks; safe to call repeatedly
    fn stop(&mut self);

    /// Rate the source produces samples at
    fn sample_rate(&self) -> u32;
}

/// Audio capture pipeline: frames, resamples, encodes
///
/// Raw blocks go in through a `SampleSender`; each full frame leaves as an
/// `EncodedChunk` on the output channel.
///
/// # Example
/// ```no_run
/// use voice_relay_lib::audio::{CaptureConfig, CapturePipeline};
/// use tokio::sync::mpsc;
///
/// #[tokio::main]
/// async fn main() {
///     let (tx, mut rx) = mpsc::unbounded_channel();
///
///     let mut pipeline = CapturePipeline::new(CaptureConfig::new(48000)).unwrap();
///     let samples = pipeline.start(tx).unwrap();
///
///     samples.on_samples(vec![0.0; 4096]);
///
///     if let Some(chunk) = rx.recv().await {
///         println!("{} ({} chars)", chunk.mime_type, chunk.data.len());
///     }
///     pipeline.stop().await;
/// }
/// ```
pub struct CapturePipeline {
    config: CaptureConfig,
    /// Attached raw-sample source (None when fed manually)
    source: Option<Box<dyn SampleSource>>,
    /// Processing task handle
    processing_task: Option<JoinHandle<()>>,
    /// Stop signal sender
    stop_signal: Option<oneshot::Sender<()>>,
    /// Whether the pipeline is currently running
    is_running: bool,
}

impl CapturePipeline {
    /// Create a new capture pipeline
    ///
    /// # Errors
    /// Returns error if the frame size or either rate is zero.
    pub fn new(config: CaptureConfig) -> AudioResult<Self> {
        // Validate up front so start() cannot fail on configuration.
        FrameAssembler::new(config.frame_size)?;
        FrameEncoder::new(config.source_rate, config.target_rate)?;

        info!(
            "Creating capture pipeline: frame={} samples, {} Hz -> {} Hz",
            config.frame_size, config.source_rate, config.target_rate
        );

        Ok(Self {
            config,
            source: None,
            processing_task: None,
            stop_signal: None,
            is_running: false,
        })
    }

    /// Start the pipeline and return the producer handle
    ///
    /// # Errors
    /// Returns `AudioError::AlreadyRunning` if the pipeline is running.
    pub fn start(&mut self, output: mpsc::UnboundedSender<EncodedChunk>) -> AudioResult<SampleSender> {
        if self.is_running {
            return Err(AudioError::AlreadyRunning);
        }

        info!("Starting capture pipeline");

        let (sample_tx, sample_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        let assembler = FrameAssembler::new(self.config.frame_size)?;
        let encoder = FrameEncoder::new(self.config.source_rate, self.config.target_rate)?;

        let processing_task = tokio::spawn(Self::processing_loop(
            sample_rx, output, stop_rx, assembler, encoder,
        ));

        self.processing_task = Some(processing_task);
        self.stop_signal = Some(stop_tx);
        self.is_running = true;

        Ok(SampleSender { tx: sample_tx })
    }

    /// Start the pipeline fed by `source`
    ///
    /// The source's own sample rate overrides the configured source rate.
    ///
    /// # Errors
    /// Returns error if the pipeline is running or the source fails to start.
    pub fn start_with_source(
        &mut self,
        mut source: Box<dyn SampleSource>,
        output: mpsc::UnboundedSender<EncodedChunk>,
    ) -> AudioResult<()> {
        if self.is_running {
            return Err(AudioError::AlreadyRunning);
        }

        self.config.source_rate = source.sample_rate();
        let sender = self.start(output)?;

        if let Err(e) = source.start(sender) {
            warn!("Sample source failed to start: {}", e);
            self.halt();
            return Err(e);
        }

        self.source = Some(source);
        Ok(())
    }

    /// Stop the pipeline
    ///
    /// Disconnects the source and discards any partial frame. No chunk is
    /// emitted after this returns.
    pub async fn stop(&mut self) {
        if !self.is_running {
            return;
        }

        info!("Stopping capture pipeline");

        let task = self.halt();

        if let Some(task) = task {
            let _ = task.await;
        }

        info!("Capture pipeline stopped");
    }

    /// Detach the source and signal the processing task
    fn halt(&mut self) -> Option<JoinHandle<()>> {
        if let Some(mut source) = self.source.take() {
            source.stop();
        }

        if let Some(stop_tx) = self.stop_signal.take() {
            let _ = stop_tx.send(());
        }

        self.is_running = false;
        self.processing_task.take()
    }

    /// Check if pipeline is running
    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// Current configuration
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    async fn processing_loop(
        mut input_rx: mpsc::UnboundedReceiver<Vec<f32>>,
        output_tx: mpsc::UnboundedSender<EncodedChunk>,
        mut stop_rx: oneshot::Receiver<()>,
        mut assembler: FrameAssembler,
        encoder: FrameEncoder,
    ) {
        let mut frame_count = 0u64;

        info!("Processing loop started");

        loop {
            tokio::select! {
                biased;

                _ = &mut stop_rx => {
                    debug!("Stop signal received, discarding {} pending samples", assembler.pending());
                    break;
                }

                block = input_rx.recv() => {
                    let Some(block) = block else {
                        info!("Sample source closed");
                        break;
                    };

                    for frame in assembler.push(block) {
                        frame_count += 1;
                        let chunk = encoder.convert(&frame).encode();

                        debug!("Emitting frame #{} ({} chars)", frame_count, chunk.data.len());

                        if output_tx.send(chunk).is_err() {
                            warn!("Output channel closed, stopping processing loop");
                            return;
                        }
                    }
                }
            }
        }

        info!("Processing loop finished after {} frames", frame_count);
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if self.is_running {
            self.halt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_exact_frames() {
        let mut assembler = FrameAssembler::new(4).unwrap();

        let frames = assembler.push(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);

        assert_eq!(frames, vec![vec![0.0, 1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0, 7.0]]);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_assembler_retains_partial() {
        let mut assembler = FrameAssembler::new(4).unwrap();

        assert!(assembler.push(vec![0.0, 1.0, 2.0]).is_empty());
        assert_eq!(assembler.pending(), 3);

        let frames = assembler.push(vec![3.0, 4.0]);
        assert_eq!(frames, vec![vec![0.0, 1.0, 2.0, 3.0]]);
        assert_eq!(assembler.pending(), 1);

        assembler.clear();
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_assembler_zero_frame_size() {
        assert!(FrameAssembler::new(0).is_err());
    }

    #[test]
    fn test_encoder_passthrough() {
        let encoder = FrameEncoder::new(16000, 16000).unwrap();

        let frame = encoder.convert(&[-1.0, 0.0, 1.0]);

        assert_eq!(frame.samples, vec![-32768, 0, 32767]);
        assert_eq!(frame.sample_rate, 16000);
        assert_eq!(frame.encode().to_pcm16().unwrap(), frame.samples);
    }

    #[test]
    fn test_encoder_downsamples() {
        let encoder = FrameEncoder::new(48000, 16000).unwrap();

        let frame = encoder.convert(&[0.5; 4096]);

        assert_eq!(frame.samples.len(), 1365);
        assert_eq!(frame.encode().mime_type, "audio/pcm;rate=16000");
    }

    #[test]
    fn test_capture_config_builder() {
        let config = CaptureConfig::new(44100)
            .with_frame_size(2048)
            .with_target_rate(24000);

        assert_eq!(config.source_rate, 44100);
        assert_eq!(config.frame_size, 2048);
        assert_eq!(config.target_rate, 24000);
        assert_eq!(CaptureConfig::default().frame_size, DEFAULT_FRAME_SIZE);
    }

    #[tokio::test]
    async fn test_pipeline_double_start() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pipeline = CapturePipeline::new(CaptureConfig::new(16000)).unwrap();

        assert!(pipeline.start(tx.clone()).is_ok());
        assert!(matches!(pipeline.start(tx), Err(AudioError::AlreadyRunning)));

        pipeline.stop().await;
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_pipeline_sender_rejected_after_stop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pipeline = CapturePipeline::new(CaptureConfig::new(16000)).unwrap();

        let samples = pipeline.start(tx).unwrap();
        pipeline.stop().await;

        assert!(!samples.on_samples(vec![0.0; 16]));
    }
}
