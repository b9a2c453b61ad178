//! Terminal client for the voice relay
//!
//! Starts a session, sends each stdin line as a user turn, prints model text
//! as it streams in and plays model audio in order.
//!
//! Usage:
//!   voice-client [ws://127.0.0.1:8765]
//!
//! Commands typed on stdin:
//!   /start  open a new session
//!   /end    close the session
//!   /clear  drop queued audio
//!   /quit   close the session and exit
//!
//! Built with `--features device`, microphone audio is streamed while a
//! session is active and audio plays on the default output device.

use std::io::Write;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use voice_relay_lib::audio::PlaybackQueue;
use voice_relay_lib::config::{AudioConfig, ConfigManager, DEFAULT_BIND};
use voice_relay_lib::conversation::ConversationLog;
use voice_relay_lib::relay::{ClientEvent, ServerEvent};
use voice_relay_lib::utils::error::ErrorCode;
use voice_relay_lib::utils::logging::init_logging;

#[cfg(feature = "device")]
use voice_relay_lib::audio::{
    AudioCapture, CaptureConfig, CapturePipeline, DeviceSink, SampleSource,
};

#[cfg(not(feature = "device"))]
use voice_relay_lib::audio::PacedSink;

#[cfg(feature = "device")]
type Sink = DeviceSink;

#[cfg(not(feature = "device"))]
type Sink = PacedSink;

#[cfg(feature = "device")]
fn open_sink() -> anyhow::Result<Sink> {
    Ok(DeviceSink::open()?)
}

#[cfg(not(feature = "device"))]
fn open_sink() -> anyhow::Result<Sink> {
    Ok(PacedSink)
}

#[cfg(feature = "device")]
fn open_microphone(
    audio: &AudioConfig,
    outbound: mpsc::UnboundedSender<ClientEvent>,
) -> anyhow::Result<CapturePipeline> {
    let capture = AudioCapture::new(None)?;
    let config = CaptureConfig::new(capture.sample_rate())
        .with_frame_size(audio.frame_size)
        .with_target_rate(audio.capture_rate);

    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
    let mut pipeline = CapturePipeline::new(config)?;
    pipeline.start_with_source(Box::new(capture), chunk_tx)?;

    tokio::spawn(async move {
        while let Some(chunk) = chunk_rx.recv().await {
            if outbound.send(ClientEvent::SendAudioChunk(chunk)).is_err() {
                break;
            }
        }
    });

    Ok(pipeline)
}

/// Microphone streaming, active only with the `device` feature
#[derive(Default)]
struct Microphone {
    #[cfg(feature = "device")]
    pipeline: Option<CapturePipeline>,
}

impl Microphone {
    #[cfg(feature = "device")]
    fn start(&mut self, audio: &AudioConfig, outbound: &mpsc::UnboundedSender<ClientEvent>) {
        if self.pipeline.is_some() {
            return;
        }

        let result = open_microphone(audio, outbound.clone());

        match result {
            Ok(pipeline) => {
                info!("Microphone streaming");
                self.pipeline = Some(pipeline);
            }
            Err(e) => warn!(error = %e, "Microphone unavailable, text only"),
        }
    }

    #[cfg(not(feature = "device"))]
    fn start(&mut self, _audio: &AudioConfig, _outbound: &mpsc::UnboundedSender<ClientEvent>) {
        debug!("Built without the device feature, microphone disabled");
    }

    async fn stop(&mut self) {
        #[cfg(feature = "device")]
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop().await;
        }
    }
}

struct Client {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    log: ConversationLog,
    playback: PlaybackQueue<Sink>,
    microphone: Microphone,
    audio: AudioConfig,
    session_active: bool,
    /// Text typed before the session opened
    held: Vec<ClientEvent>,
    /// Text turns sent and not yet completed
    pending_turns: usize,
    /// stdin is exhausted; end the session once answers are in
    draining: bool,
    /// Leaving once the session has closed
    ending: bool,
    done: bool,
}

impl Client {
    fn send(&self, event: ClientEvent) {
        if self.outbound.send(event).is_err() {
            warn!("Writer stopped, event dropped");
        }
    }

    /// End the session and exit once it has closed
    fn finish(&mut self) {
        if self.ending {
            return;
        }
        self.ending = true;
        if self.session_active {
            self.send(ClientEvent::EndSession);
        } else {
            self.done = true;
        }
    }

    /// Handle one stdin line; `false` to stop reading
    fn handle_line(&mut self, line: String) -> bool {
        match line.trim() {
            "" => {}
            "/start" => self.send(ClientEvent::StartSession),
            "/end" => self.send(ClientEvent::EndSession),
            "/clear" => {
                let dropped = self.playback.clear();
                println!("[dropped {} queued audio chunks]", dropped);
            }
            "/quit" => {
                self.finish();
                return false;
            }
            text => {
                self.log.push_user(text);
                self.pending_turns += 1;
                let event = ClientEvent::SendText {
                    text: text.to_string(),
                };
                if self.session_active {
                    self.send(event);
                } else {
                    self.held.push(event);
                }
            }
        }
        true
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionStarted => {
                println!("[session started]");
                self.session_active = true;
                for event in std::mem::take(&mut self.held) {
                    self.send(event);
                }
                self.microphone.start(&self.audio, &self.outbound);
            }
            ServerEvent::TextPart { text } => {
                self.log.append_assistant(&text);
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            ServerEvent::AudioPart { audio } => {
                let seq = self.playback.enqueue(audio);
                debug!(seq, "Audio part queued");
            }
            ServerEvent::TurnComplete => {
                self.log.complete_turn();
                println!();
                self.pending_turns = self.pending_turns.saturating_sub(1);
                if self.draining && self.pending_turns == 0 {
                    self.finish();
                }
            }
            ServerEvent::SessionError { message, code } => {
                eprintln!("[error {:?}] {}", code, message);
                self.log.push_system(format!("error: {}", message));
                if matches!(
                    code,
                    ErrorCode::UpstreamOpenFailed | ErrorCode::UpstreamRuntimeError
                ) {
                    self.session_ended().await;
                }
            }
            ServerEvent::SessionClosed { reason } => {
                println!("[session closed: {}]", reason);
                self.log.push_system(format!("session closed: {}", reason));
                self.session_ended().await;
            }
        }
    }

    async fn session_ended(&mut self) {
        self.session_active = false;
        self.held.clear();
        self.pending_turns = 0;
        self.microphone.stop().await;
        if self.ending || self.draining {
            self.done = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("ws://{}", DEFAULT_BIND));

    let config_path =
        std::env::var("VOICE_RELAY_CONFIG").unwrap_or_else(|_| "voice-relay.json".to_string());
    let config = ConfigManager::load(&config_path)?;

    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", url))?;
    info!(url = %url, "Connected to relay");

    let (mut ws_writer, mut ws_reader) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientEvent>();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize event");
                    continue;
                }
            };
            if let Err(e) = ws_writer.send(Message::Text(json.into())).await {
                warn!(error = %e, "Relay socket write failed");
                break;
            }
        }
        let _ = ws_writer.close().await;
    });

    let playback = PlaybackQueue::new(open_sink()?);
    playback.set_default_rate(config.audio.playback_rate);

    let mut client = Client {
        outbound: outbound_tx,
        log: ConversationLog::new(),
        playback,
        microphone: Microphone::default(),
        audio: config.audio.clone(),
        session_active: false,
        held: Vec::new(),
        pending_turns: 0,
        draining: false,
        ending: false,
        done: false,
    };

    client.send(ClientEvent::StartSession);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            msg = ws_reader.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerEvent>(text.as_str()) {
                        Ok(event) => client.handle_event(event).await,
                        Err(e) => warn!(error = %e, "Unparseable relay event"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    println!("[relay closed the connection]");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Relay socket read failed");
                    break;
                }
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if !client.handle_line(line) {
                        stdin_open = false;
                    }
                }
                None => {
                    stdin_open = false;
                    client.draining = true;
                    if client.pending_turns == 0 {
                        client.finish();
                    }
                }
            },
        }

        if client.done {
            break;
        }
    }

    client.microphone.stop().await;
    client.playback.wait_idle().await;

    let Client { outbound, log, .. } = client;
    drop(outbound);
    let _ = writer.await;

    info!(turns = log.len(), "Conversation finished");
    Ok(())
}
