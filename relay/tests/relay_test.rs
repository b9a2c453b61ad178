/// Integration tests for the session relay
///
/// Drives a spawned relay through its handle against an in-process echo
/// service, the way the WebSocket server does.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use voice_relay_lib::audio::EncodedChunk;
use voice_relay_lib::network::{
    NetworkError, NetworkResult, ServerContent, UpstreamConnector, UpstreamContent,
    UpstreamListener, UpstreamPart, UpstreamSession,
};
use voice_relay_lib::relay::{
    ClientEvent, ConnectionId, ConnectionState, PartRouting, RelayHandle, ServerEvent,
    SessionRelay,
};
use voice_relay_lib::utils::error::ErrorCode;

/// Service that answers every text turn with the same text, uppercased
#[derive(Clone, Default)]
struct EchoService {
    refuse: Option<String>,
    listeners: Arc<Mutex<Vec<UpstreamListener>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl EchoService {
    fn refusing(message: &str) -> Self {
        Self {
            refuse: Some(message.to_string()),
            ..Self::default()
        }
    }

    fn last_listener(&self) -> UpstreamListener {
        self.listeners.lock().unwrap().last().cloned().expect("no session opened")
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct EchoSession {
    listener: UpstreamListener,
    closed_count: Arc<AtomicUsize>,
    closed: bool,
}

impl UpstreamSession for EchoSession {
    fn send(&mut self, content: UpstreamContent) -> NetworkResult<()> {
        if self.closed {
            return Err(NetworkError::ConnectionClosed);
        }
        match content {
            UpstreamContent::Text(text) => self.listener.on_content(ServerContent {
                parts: vec![UpstreamPart::Text(text.to_uppercase())],
                turn_complete: true,
            }),
            UpstreamContent::Audio(chunk) => self.listener.on_content(ServerContent::audio(chunk)),
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closed_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl UpstreamConnector for EchoService {
    fn open(
        &self,
        listener: UpstreamListener,
    ) -> BoxFuture<'static, NetworkResult<Box<dyn UpstreamSession>>> {
        let service = self.clone();
        Box::pin(async move {
            if let Some(message) = service.refuse {
                return Err(NetworkError::Rejected(message));
            }
            service.listeners.lock().unwrap().push(listener.clone());
            service.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoSession {
                listener,
                closed_count: Arc::clone(&service.closed),
                closed: false,
            }) as Box<dyn UpstreamSession>)
        })
    }
}

/// Service that speaks first: it emits while the open is still in progress
#[derive(Clone, Default)]
struct GreetingService {
    hang_up: bool,
    closed: Arc<AtomicUsize>,
}

impl UpstreamConnector for GreetingService {
    fn open(
        &self,
        listener: UpstreamListener,
    ) -> BoxFuture<'static, NetworkResult<Box<dyn UpstreamSession>>> {
        let service = self.clone();
        Box::pin(async move {
            listener.on_content(ServerContent::text("greeting").with_turn_complete());
            if service.hang_up {
                listener.on_close("server went away");
            }
            Ok(Box::new(EchoSession {
                listener,
                closed_count: Arc::clone(&service.closed),
                closed: false,
            }) as Box<dyn UpstreamSession>)
        })
    }
}

struct Client {
    id: ConnectionId,
    relay: RelayHandle,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Client {
    fn connect(relay: &RelayHandle, id: u64) -> Self {
        let id = ConnectionId::new(id);
        let (tx, rx) = mpsc::unbounded_channel();
        assert!(relay.connect(id, tx));
        Self {
            id,
            relay: relay.clone(),
            rx,
        }
    }

    fn send(&self, event: ClientEvent) {
        assert!(self.relay.client_event(self.id, event));
    }

    async fn next(&mut self) -> ServerEvent {
        timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for relay event")
            .expect("relay dropped the connection")
    }

    async fn start(&mut self) {
        self.send(ClientEvent::StartSession);
        assert_eq!(self.next().await, ServerEvent::SessionStarted);
    }

    async fn state(&self) -> Option<ConnectionState> {
        self.relay.state(self.id).await
    }
}

fn error_code(event: &ServerEvent) -> ErrorCode {
    match event {
        ServerEvent::SessionError { code, .. } => *code,
        other => panic!("expected session-error, got {:?}", other),
    }
}

fn spawn(service: &EchoService) -> (RelayHandle, tokio::task::JoinHandle<()>) {
    SessionRelay::spawn(Arc::new(service.clone()), PartRouting::FirstOnly)
}

#[tokio::test]
async fn test_text_turn_end_to_end() {
    let service = EchoService::default();
    let (relay, _task) = spawn(&service);
    let mut client = Client::connect(&relay, 1);

    client.start().await;
    assert_eq!(client.state().await, Some(ConnectionState::Active));

    client.send(ClientEvent::SendText {
        text: "hello".to_string(),
    });
    assert_eq!(
        client.next().await,
        ServerEvent::TextPart {
            text: "HELLO".to_string()
        }
    );
    assert_eq!(client.next().await, ServerEvent::TurnComplete);

    client.send(ClientEvent::EndSession);
    assert_eq!(client.next().await, ServerEvent::closed("ended by client"));
    assert_eq!(client.state().await, Some(ConnectionState::Idle));
    assert_eq!(service.closed(), 1);
}

#[tokio::test]
async fn test_audio_chunk_reaches_client_unchanged() {
    let service = EchoService::default();
    let (relay, _task) = spawn(&service);
    let mut client = Client::connect(&relay, 1);
    client.start().await;

    let chunk = EncodedChunk::from_pcm16(&[1, -2, 3, -4], 16000);
    client.send(ClientEvent::SendAudioChunk(chunk.clone()));

    assert_eq!(client.next().await, ServerEvent::AudioPart { audio: chunk });
}

#[tokio::test]
async fn test_second_start_is_rejected_and_session_survives() {
    let service = EchoService::default();
    let (relay, _task) = spawn(&service);
    let mut client = Client::connect(&relay, 1);
    client.start().await;

    client.send(ClientEvent::StartSession);
    let event = client.next().await;
    assert_eq!(error_code(&event), ErrorCode::SessionAlreadyActive);
    assert_eq!(service.opened(), 1);

    client.send(ClientEvent::SendText {
        text: "still here".to_string(),
    });
    assert_eq!(
        client.next().await,
        ServerEvent::TextPart {
            text: "STILL HERE".to_string()
        }
    );
}

#[tokio::test]
async fn test_content_without_session_is_rejected() {
    let service = EchoService::default();
    let (relay, _task) = spawn(&service);
    let mut client = Client::connect(&relay, 1);

    client.send(ClientEvent::SendText {
        text: "anyone?".to_string(),
    });

    let event = client.next().await;
    assert_eq!(error_code(&event), ErrorCode::NoActiveSession);
    assert_eq!(client.state().await, Some(ConnectionState::Idle));
}

#[tokio::test]
async fn test_end_without_session_is_silent() {
    let service = EchoService::default();
    let (relay, _task) = spawn(&service);
    let mut client = Client::connect(&relay, 1);

    client.send(ClientEvent::EndSession);
    client.send(ClientEvent::EndSession);

    // The state query is processed after both ends, so nothing was emitted
    assert_eq!(client.state().await, Some(ConnectionState::Idle));
    assert!(client.rx.try_recv().is_err());
    assert_eq!(service.closed(), 0);
}

#[tokio::test]
async fn test_open_failure_reports_error_and_allows_retry() {
    let service = EchoService::refusing("quota exceeded");
    let (relay, _task) = spawn(&service);
    let mut client = Client::connect(&relay, 1);

    client.send(ClientEvent::StartSession);
    match client.next().await {
        ServerEvent::SessionError { code, message } => {
            assert_eq!(code, ErrorCode::UpstreamOpenFailed);
            assert!(message.contains("quota exceeded"), "message: {}", message);
        }
        other => panic!("expected session-error, got {:?}", other),
    }
    assert_eq!(client.state().await, Some(ConnectionState::Idle));

    client.send(ClientEvent::StartSession);
    let event = client.next().await;
    assert_eq!(error_code(&event), ErrorCode::UpstreamOpenFailed);
}

#[tokio::test]
async fn test_upstream_error_tears_session_down() {
    let service = EchoService::default();
    let (relay, _task) = spawn(&service);
    let mut client = Client::connect(&relay, 1);
    client.start().await;

    service.last_listener().on_error("stream reset");

    let event = client.next().await;
    assert_eq!(error_code(&event), ErrorCode::UpstreamRuntimeError);
    assert_eq!(client.state().await, Some(ConnectionState::Idle));
    assert_eq!(service.closed(), 1);

    // A fresh session can be opened afterwards
    client.start().await;
    assert_eq!(service.opened(), 2);
}

#[tokio::test]
async fn test_upstream_close_is_forwarded() {
    let service = EchoService::default();
    let (relay, _task) = spawn(&service);
    let mut client = Client::connect(&relay, 1);
    client.start().await;

    service.last_listener().on_close("service going away");

    assert_eq!(client.next().await, ServerEvent::closed("service going away"));
    assert_eq!(client.state().await, Some(ConnectionState::Idle));
}

#[tokio::test]
async fn test_events_from_ended_session_are_dropped() {
    let service = EchoService::default();
    let (relay, _task) = spawn(&service);
    let mut client = Client::connect(&relay, 1);
    client.start().await;

    let stale = service.last_listener();
    client.send(ClientEvent::EndSession);
    assert_eq!(client.next().await, ServerEvent::closed("ended by client"));

    client.start().await;
    stale.on_content(ServerContent::text("late").with_turn_complete());
    stale.on_error("late failure");

    client.send(ClientEvent::SendText {
        text: "fresh".to_string(),
    });
    assert_eq!(
        client.next().await,
        ServerEvent::TextPart {
            text: "FRESH".to_string()
        }
    );
    assert_eq!(client.next().await, ServerEvent::TurnComplete);
    assert_eq!(client.state().await, Some(ConnectionState::Active));
}

#[tokio::test]
async fn test_disconnect_closes_upstream_session() {
    let service = EchoService::default();
    let (relay, _task) = spawn(&service);
    let mut client = Client::connect(&relay, 1);
    client.start().await;

    assert!(relay.disconnect(client.id));

    assert_eq!(client.state().await, None);
    assert_eq!(service.closed(), 1);
}

#[tokio::test]
async fn test_connections_are_independent() {
    let service = EchoService::default();
    let (relay, _task) = spawn(&service);
    let mut first = Client::connect(&relay, 1);
    let mut second = Client::connect(&relay, 2);

    first.start().await;
    second.start().await;

    first.send(ClientEvent::EndSession);
    assert_eq!(first.next().await, ServerEvent::closed("ended by client"));

    second.send(ClientEvent::SendText {
        text: "mine".to_string(),
    });
    assert_eq!(
        second.next().await,
        ServerEvent::TextPart {
            text: "MINE".to_string()
        }
    );
    assert_eq!(second.state().await, Some(ConnectionState::Active));
    assert!(first.rx.try_recv().is_err());
}

#[tokio::test]
async fn test_shutdown_closes_every_session() {
    let service = EchoService::default();
    let (relay, task) = spawn(&service);
    let mut first = Client::connect(&relay, 1);
    let mut second = Client::connect(&relay, 2);
    first.start().await;
    second.start().await;

    assert!(relay.shutdown());
    timeout(Duration::from_secs(2), task)
        .await
        .expect("relay did not stop")
        .unwrap();

    assert_eq!(service.closed(), 2);
    assert!(relay.is_closed());
    assert_eq!(relay.state(first.id).await, None);
}

#[tokio::test]
async fn test_greeting_sent_during_open_reaches_client() {
    let service = GreetingService::default();
    let (relay, _task) = SessionRelay::spawn(Arc::new(service.clone()), PartRouting::FirstOnly);
    let mut client = Client::connect(&relay, 1);

    client.start().await;
    assert_eq!(
        client.next().await,
        ServerEvent::TextPart {
            text: "greeting".to_string()
        }
    );
    assert_eq!(client.next().await, ServerEvent::TurnComplete);

    client.send(ClientEvent::SendText {
        text: "hi".to_string(),
    });
    assert_eq!(
        client.next().await,
        ServerEvent::TextPart {
            text: "HI".to_string()
        }
    );
    assert_eq!(client.state().await, Some(ConnectionState::Active));
}

#[tokio::test]
async fn test_close_during_open_ends_the_session() {
    let service = GreetingService {
        hang_up: true,
        ..GreetingService::default()
    };
    let (relay, _task) = SessionRelay::spawn(Arc::new(service.clone()), PartRouting::FirstOnly);
    let mut client = Client::connect(&relay, 1);

    client.start().await;
    assert_eq!(
        client.next().await,
        ServerEvent::TextPart {
            text: "greeting".to_string()
        }
    );
    assert_eq!(client.next().await, ServerEvent::TurnComplete);
    assert_eq!(client.next().await, ServerEvent::closed("server went away"));

    assert_eq!(client.state().await, Some(ConnectionState::Idle));
    assert_eq!(service.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_teardown_after_upstream_close_is_quiet() {
    let service = EchoService::default();
    let (relay, _task) = spawn(&service);
    let mut client = Client::connect(&relay, 1);
    client.start().await;

    service.last_listener().on_close("done");
    assert_eq!(client.next().await, ServerEvent::closed("done"));
    assert_eq!(service.closed(), 1);

    client.send(ClientEvent::EndSession);
    assert_eq!(client.state().await, Some(ConnectionState::Idle));
    assert!(relay.disconnect(client.id));
    assert_eq!(client.state().await, None);

    // The relay dropped its sender on disconnect; nothing was queued after the close
    assert_eq!(
        timeout(Duration::from_secs(2), client.rx.recv())
            .await
            .expect("relay kept the connection"),
        None
    );
    assert_eq!(service.closed(), 1);
}
