//! Upstream streaming session abstraction
//!
//! The relay talks to the AI service only through these types. An
//! [`UpstreamConnector`] opens sessions; each open session is a boxed
//! [`UpstreamSession`] that accepts content and reports everything the
//! service produces to an [`UpstreamListener`], in production order.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::audio::codec::EncodedChunk;
use crate::network::error::NetworkResult;

/// Content sent from a client towards the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamContent {
    /// A complete user text turn
    Text(String),
    /// One frame of microphone audio
    Audio(EncodedChunk),
}

/// One content part produced by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamPart {
    /// Model text
    Text(String),
    /// Model audio
    InlineAudio(EncodedChunk),
}

/// One server message's worth of content
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerContent {
    /// Parts in the order the service listed them
    pub parts: Vec<UpstreamPart>,
    /// The model finished its turn with this message
    pub turn_complete: bool,
}

impl ServerContent {
    /// A message with a single text part
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![UpstreamPart::Text(text.into())],
            turn_complete: false,
        }
    }

    /// A message with a single audio part
    pub fn audio(chunk: EncodedChunk) -> Self {
        Self {
            parts: vec![UpstreamPart::InlineAudio(chunk)],
            turn_complete: false,
        }
    }

    /// Mark the message as ending the model turn
    pub fn with_turn_complete(mut self) -> Self {
        self.turn_complete = true;
        self
    }
}

/// Everything an open session can report after it opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Server content
    Content(ServerContent),
    /// Runtime failure; the session is unusable afterwards
    Error(String),
    /// The service closed the session
    Closed(String),
}

/// Callback set handed to a connector when a session is opened
///
/// Invoked sequentially from a single task per session, so events arrive in
/// the order the service produced them.
#[derive(Clone)]
pub struct UpstreamListener {
    callback: Arc<dyn Fn(UpstreamEvent) + Send + Sync>,
}

impl UpstreamListener {
    /// Wrap a callback
    pub fn new(callback: impl Fn(UpstreamEvent) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Deliver any event
    pub fn emit(&self, event: UpstreamEvent) {
        (self.callback)(event);
    }

    /// Deliver server content
    pub fn on_content(&self, content: ServerContent) {
        self.emit(UpstreamEvent::Content(content));
    }

    /// Deliver a runtime error
    pub fn on_error(&self, message: impl Into<String>) {
        self.emit(UpstreamEvent::Error(message.into()));
    }

    /// Deliver a close notification
    pub fn on_close(&self, reason: impl Into<String>) {
        self.emit(UpstreamEvent::Closed(reason.into()));
    }
}

impl fmt::Debug for UpstreamListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamListener").finish_non_exhaustive()
    }
}

/// Handle to one open upstream session
///
/// Exclusively owned by one relay connection.
pub trait UpstreamSession: Send {
    /// Queue content for the service; never waits on the network
    fn send(&mut self, content: UpstreamContent) -> NetworkResult<()>;

    /// Close the session; further calls are no-ops
    fn close(&mut self);

    /// Whether `close` has run
    fn is_closed(&self) -> bool;
}

/// Opens upstream sessions
pub trait UpstreamConnector: Send + Sync + 'static {
    /// Open a session that reports to `listener`
    ///
    /// Resolves once the service has accepted (or refused) the session.
    fn open(
        &self,
        listener: UpstreamListener,
    ) -> BoxFuture<'static, NetworkResult<Box<dyn UpstreamSession>>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_listener_delivers_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = UpstreamListener::new(move |event| sink.lock().unwrap().push(event));

        listener.on_content(ServerContent::text("a"));
        listener.on_error("boom");
        listener.on_close("bye");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], UpstreamEvent::Content(ServerContent::text("a")));
        assert_eq!(seen[1], UpstreamEvent::Error("boom".to_string()));
        assert_eq!(seen[2], UpstreamEvent::Closed("bye".to_string()));
    }

    #[test]
    fn test_server_content_builders() {
        let content = ServerContent::audio(EncodedChunk::new("AAA=", "audio/pcm;rate=24000"))
            .with_turn_complete();

        assert!(content.turn_complete);
        assert!(matches!(content.parts[0], UpstreamPart::InlineAudio(_)));
    }
}
