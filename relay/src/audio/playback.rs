//! Sequential playback of received audio chunks
//!
//! A `PlaybackQueue` owns a FIFO of encoded chunks and plays them one after
//! another through an [`AudioSink`]. At most one chunk is in the sink at any
//! time. A chunk that fails to decode or render is reported through
//! [`PlaybackEvent::Failed`] and the queue moves on to the next one.
//!
//! # Example
//!
//! ```no_run
//! use voice_relay_lib::audio::{EncodedChunk, PacedSink, PlaybackQueue};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let queue = PlaybackQueue::new(PacedSink::default());
//!
//! queue.enqueue(EncodedChunk::from_pcm16(&[0; 2400], 24000));
//! queue.enqueue(EncodedChunk::from_pcm16(&[0; 2400], 24000));
//!
//! queue.wait_idle().await;
//! # }
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::audio::codec::{EncodedChunk, pcm16_to_floats};
use crate::audio::error::AudioResult;

/// Sample rate assumed for chunks whose MIME tag carries none
pub const DEFAULT_PLAYBACK_RATE: u32 = 24000;

/// Renders decoded samples
///
/// `play` resolves once the sink is ready for the next chunk. A buffered
/// sink may return while the tail of the chunk is still sounding; `drain`
/// waits for that tail.
pub trait AudioSink: Send + Sync + 'static {
    /// Play mono samples at `sample_rate`
    fn play(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> impl Future<Output = AudioResult<()>> + Send;

    /// Wait until everything handed to `play` has sounded
    fn drain(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Sink without an output device that takes as long as the audio would
///
/// Keeps the queue's timing realistic when no speaker is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacedSink;

impl AudioSink for PacedSink {
    async fn play(&self, samples: Vec<f32>, sample_rate: u32) -> AudioResult<()> {
        let secs = samples.len() as f64 / sample_rate.max(1) as f64;
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        Ok(())
    }
}

/// Observable queue state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    /// Nothing sounding, nothing queued
    Idle,
    /// Chunk `seq` is in the sink
    Playing { seq: u64 },
}

impl PlaybackState {
    /// Check if the queue is idle
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Per-chunk playback notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlaybackEvent {
    /// Chunk `seq` started sounding
    Started { seq: u64 },
    /// Chunk `seq` finished
    Finished { seq: u64 },
    /// Chunk `seq` could not be decoded or rendered
    Failed { seq: u64, message: String },
    /// Queue drained
    Idle,
}

struct QueueInner {
    items: VecDeque<(u64, EncodedChunk)>,
    playing: bool,
    next_seq: u64,
}

struct Shared<S> {
    sink: S,
    inner: Mutex<QueueInner>,
    state_tx: watch::Sender<PlaybackState>,
    events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
    default_rate: AtomicU32,
}

impl<S> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// FIFO playback queue for one client
pub struct PlaybackQueue<S: AudioSink> {
    shared: Arc<Shared<S>>,
}

impl<S: AudioSink> PlaybackQueue<S> {
    /// Create an idle queue playing through `sink`
    pub fn new(sink: S) -> Self {
        Self::build(sink, None)
    }

    /// Create a queue that also reports every [`PlaybackEvent`]
    pub fn with_events(sink: S, events: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
        Self::build(sink, Some(events))
    }

    fn build(sink: S, events: Option<mpsc::UnboundedSender<PlaybackEvent>>) -> Self {
        let (state_tx, _) = watch::channel(PlaybackState::Idle);

        Self {
            shared: Arc::new(Shared {
                sink,
                inner: Mutex::new(QueueInner {
                    items: VecDeque::new(),
                    playing: false,
                    next_seq: 0,
                }),
                state_tx,
                events,
                default_rate: AtomicU32::new(DEFAULT_PLAYBACK_RATE),
            }),
        }
    }

    /// Append a chunk; starts playback if the queue was idle
    ///
    /// Returns the chunk's sequence number. Must be called from within a
    /// tokio runtime.
    pub fn enqueue(&self, chunk: EncodedChunk) -> u64 {
        let (seq, start) = {
            let mut inner = self.shared.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.items.push_back((seq, chunk));

            let start = !inner.playing;
            if start {
                inner.playing = true;
                self.shared.state_tx.send_replace(PlaybackState::Playing { seq });
            }
            (seq, start)
        };

        debug!(seq, start, "Chunk enqueued");

        if start {
            tokio::spawn(play_next(Arc::clone(&self.shared)));
        }
        seq
    }

    /// Rate used for chunks whose MIME tag carries none; zero is ignored
    pub fn set_default_rate(&self, rate: u32) {
        if rate > 0 {
            self.shared.default_rate.store(rate, Ordering::Relaxed);
        }
    }

    /// Drop every pending chunk
    ///
    /// A chunk already sounding plays to the end. Returns how many chunks
    /// were discarded.
    pub fn clear(&self) -> usize {
        let mut inner = self.shared.lock();
        let dropped = inner.items.len();
        inner.items.clear();
        debug!(dropped, "Playback queue cleared");
        dropped
    }

    /// Chunks waiting behind the one sounding
    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    /// Check if no chunks are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current state
    pub fn state(&self) -> PlaybackState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.shared.state_tx.subscribe()
    }

    /// Resolve once the queue has drained and the sink has gone quiet
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.state_tx.subscribe();
        let _ = rx.wait_for(PlaybackState::is_idle).await;
        self.shared.sink.drain().await;
    }
}

/// Drain the queue through the sink, one chunk at a time
async fn play_next<S: AudioSink>(shared: Arc<Shared<S>>) {
    loop {
        let next = {
            let mut inner = shared.lock();
            match inner.items.pop_front() {
                Some(item) => Some(item),
                None => {
                    inner.playing = false;
                    shared.state_tx.send_replace(PlaybackState::Idle);
                    None
                }
            }
        };

        let Some((seq, chunk)) = next else {
            debug!("Playback queue idle");
            shared.emit(PlaybackEvent::Idle);
            return;
        };

        shared.state_tx.send_replace(PlaybackState::Playing { seq });
        shared.emit(PlaybackEvent::Started { seq });

        let rate = chunk
            .sample_rate()
            .unwrap_or_else(|| shared.default_rate.load(Ordering::Relaxed));
        let result = match chunk.to_pcm16() {
            Ok(pcm) => shared.sink.play(pcm16_to_floats(&pcm), rate).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => shared.emit(PlaybackEvent::Finished { seq }),
            Err(e) => {
                warn!(seq, error = %e, "Chunk playback failed, continuing");
                shared.emit(PlaybackEvent::Failed {
                    seq,
                    message: e.to_string(),
                });
            }
        }
    }
}
