/// Integration tests for the capture pipeline
///
/// Feeds raw sample blocks in and checks the encoded frames that come out:
/// frame count and order, partial-frame retention, resampling and stop.

use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use voice_relay_lib::audio::{
    AudioResampler, AudioResult, CaptureConfig, CapturePipeline, EncodedChunk, SampleSender,
    SampleSource, floats_to_pcm16,
};

async fn next_chunk(rx: &mut mpsc::UnboundedReceiver<EncodedChunk>) -> EncodedChunk {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("pipeline output closed")
}

fn ramp(start: usize, len: usize) -> Vec<f32> {
    (start..start + len).map(|i| i as f32 / 100.0).collect()
}

/// Source that delivers a fixed script of blocks as soon as it starts
struct ScriptedSource {
    rate: u32,
    blocks: Vec<Vec<f32>>,
    _sender: Option<SampleSender>,
}

impl SampleSource for ScriptedSource {
    fn start(&mut self, sender: SampleSender) -> AudioResult<()> {
        for block in self.blocks.drain(..) {
            sender.on_samples(block);
        }
        self._sender = Some(sender);
        Ok(())
    }

    fn stop(&mut self) {
        self._sender = None;
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }
}

#[tokio::test]
async fn test_full_frames_are_emitted_in_order() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = CaptureConfig::new(16000)
        .with_frame_size(4)
        .with_target_rate(16000);
    let mut pipeline = CapturePipeline::new(config).unwrap();
    let samples = pipeline.start(tx).unwrap();

    // 3 + 5 + 4 samples: three full frames of 4
    let all = ramp(0, 12);
    assert!(samples.on_samples(all[..3].to_vec()));
    assert!(samples.on_samples(all[3..8].to_vec()));
    assert!(samples.on_samples(all[8..].to_vec()));

    for frame in all.chunks(4) {
        let chunk = next_chunk(&mut rx).await;
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert_eq!(chunk.to_pcm16().unwrap(), floats_to_pcm16(frame));
    }

    pipeline.stop().await;
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_partial_frame_is_retained_until_complete() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = CaptureConfig::new(16000)
        .with_frame_size(8)
        .with_target_rate(16000);
    let mut pipeline = CapturePipeline::new(config).unwrap();
    let samples = pipeline.start(tx).unwrap();

    let all = ramp(0, 8);
    samples.on_samples(all[..5].to_vec());

    assert!(
        timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
        "a partial frame must not be emitted"
    );

    samples.on_samples(all[5..].to_vec());
    let chunk = next_chunk(&mut rx).await;
    assert_eq!(chunk.to_pcm16().unwrap(), floats_to_pcm16(&all));

    pipeline.stop().await;
}

#[tokio::test]
async fn test_frames_are_resampled_to_target_rate() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = CaptureConfig::new(48000)
        .with_frame_size(4096)
        .with_target_rate(16000);
    let mut pipeline = CapturePipeline::new(config).unwrap();
    let samples = pipeline.start(tx).unwrap();

    samples.on_samples(vec![0.25; 4096]);

    let chunk = next_chunk(&mut rx).await;
    let pcm = chunk.to_pcm16().unwrap();
    let expected_len = AudioResampler::new(48000, 16000).unwrap().output_len(4096);

    assert_eq!(chunk.sample_rate(), Some(16000));
    assert_eq!(pcm.len(), expected_len);
    assert!(pcm.iter().all(|&s| s == pcm[0]));

    pipeline.stop().await;
}

#[tokio::test]
async fn test_stop_discards_partial_frame() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = CaptureConfig::new(16000)
        .with_frame_size(4)
        .with_target_rate(16000);
    let mut pipeline = CapturePipeline::new(config).unwrap();
    let samples = pipeline.start(tx).unwrap();

    samples.on_samples(ramp(0, 6));
    next_chunk(&mut rx).await;

    pipeline.stop().await;
    assert!(!pipeline.is_running());

    // The two leftover samples never leave, and later input goes nowhere
    assert!(!samples.on_samples(ramp(6, 2)));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_pipeline_restarts_after_stop() {
    let config = CaptureConfig::new(16000)
        .with_frame_size(2)
        .with_target_rate(16000);
    let mut pipeline = CapturePipeline::new(config).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let samples = pipeline.start(tx).unwrap();
    samples.on_samples(vec![0.1]);
    pipeline.stop().await;
    assert!(rx.recv().await.is_none());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let samples = pipeline.start(tx).unwrap();
    samples.on_samples(vec![0.5, 0.5]);

    // Nothing carried over from the first run
    let chunk = next_chunk(&mut rx).await;
    assert_eq!(chunk.to_pcm16().unwrap(), floats_to_pcm16(&[0.5, 0.5]));

    pipeline.stop().await;
}

#[tokio::test]
async fn test_attached_source_sets_rate_and_is_stopped() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = CaptureConfig::new(16000)
        .with_frame_size(4)
        .with_target_rate(16000);
    let mut pipeline = CapturePipeline::new(config).unwrap();

    let source = ScriptedSource {
        rate: 32000,
        blocks: vec![ramp(0, 4)],
        _sender: None,
    };
    pipeline.start_with_source(Box::new(source), tx).unwrap();
    assert_eq!(pipeline.config().source_rate, 32000);

    // One 4-sample frame at 32 kHz, halved to 2 samples at 16 kHz
    let chunk = next_chunk(&mut rx).await;
    assert_eq!(chunk.to_pcm16().unwrap().len(), 2);

    pipeline.stop().await;
    assert!(rx.recv().await.is_none());
}
