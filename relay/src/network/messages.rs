/// WebSocket message types for the upstream live-conversation API
///
/// The service speaks a bidirectional JSON protocol: one `setup` message
/// opens the session, `clientContent` carries text turns, `realtimeInput`
/// carries audio frames, and the service answers with `setupComplete`
/// followed by `serverContent` messages.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::codec::EncodedChunk;
use crate::network::upstream::{ServerContent, UpstreamContent, UpstreamEvent, UpstreamPart};

// ============================================================================
// Client -> Server Messages
// ============================================================================

/// Session setup, sent once right after the socket opens
///
/// # Example
/// ```
/// use voice_relay_lib::network::messages::SetupMessage;
///
/// let setup = SetupMessage::new("models/gemini-2.0-flash-exp")
///     .with_system_instruction("Answer briefly.");
///
/// let json = serde_json::to_string(&setup).unwrap();
/// assert!(json.starts_with("{\"setup\":"));
/// ```
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SetupMessage {
    pub setup: Setup,
}

/// Body of a [`SetupMessage`]
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Model resource name
    pub model: String,

    /// Output configuration
    pub generation_config: GenerationConfig,

    /// Optional system prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

/// Generation options sent with setup
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Modalities the model answers in ("AUDIO", "TEXT")
    pub response_modalities: Vec<String>,
}

impl SetupMessage {
    /// Create a setup message answering with audio
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            setup: Setup {
                model: model.into(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                },
                system_instruction: None,
            },
        }
    }

    /// Replace the response modalities
    pub fn with_modalities(mut self, modalities: Vec<String>) -> Self {
        self.setup.generation_config.response_modalities = modalities;
        self
    }

    /// Add a system prompt
    pub fn with_system_instruction(mut self, text: impl Into<String>) -> Self {
        self.setup.system_instruction = Some(Content::text(None, text));
        self
    }
}

/// Turn-based content
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

/// Streaming media input
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<EncodedChunk>,
}

/// Union type for everything sent after setup
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// A text turn
    ClientContent(ClientContent),
    /// Audio frames
    RealtimeInput(RealtimeInput),
}

impl From<UpstreamContent> for ClientMessage {
    fn from(content: UpstreamContent) -> Self {
        match content {
            UpstreamContent::Text(text) => ClientMessage::ClientContent(ClientContent {
                turns: vec![Content::text(Some("user"), text)],
                turn_complete: true,
            }),
            UpstreamContent::Audio(chunk) => ClientMessage::RealtimeInput(RealtimeInput {
                media_chunks: vec![chunk],
            }),
        }
    }
}

// ============================================================================
// Shared content types
// ============================================================================

/// A role-tagged list of parts
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// Single text part
    pub fn text(role: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

/// One part: text or inline media
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<EncodedChunk>,
}

impl Part {
    /// Convert to a relay part; empty parts yield `None`
    pub fn into_upstream(self) -> Option<UpstreamPart> {
        if let Some(chunk) = self.inline_data {
            return Some(UpstreamPart::InlineAudio(chunk));
        }
        self.text
            .filter(|text| !text.is_empty())
            .map(UpstreamPart::Text)
    }
}

// ============================================================================
// Server -> Client Messages
// ============================================================================

/// Messages received from the service
///
/// Exactly one of the fields is normally present.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// Setup accepted; the session is open
    #[serde(default)]
    pub setup_complete: Option<Value>,

    /// Model output
    #[serde(default)]
    pub server_content: Option<ServerContentMessage>,

    /// Service is about to disconnect
    #[serde(default)]
    pub go_away: Option<Value>,

    /// Service-reported error
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

/// Model output body
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContentMessage {
    #[serde(default)]
    pub model_turn: Option<Content>,

    #[serde(default)]
    pub turn_complete: bool,

    #[serde(default)]
    pub interrupted: bool,
}

/// Error body
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<i64>,

    #[serde(default)]
    pub message: String,
}

impl ServerMessage {
    /// Check if this message confirms setup
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Convert into a relay event
    ///
    /// Setup confirmations and empty messages yield `None`.
    pub fn into_event(self) -> Option<UpstreamEvent> {
        if let Some(error) = self.error {
            return Some(UpstreamEvent::Error(match error.code {
                Some(code) => format!("{} (code {})", error.message, code),
                None => error.message,
            }));
        }

        if self.go_away.is_some() {
            return Some(UpstreamEvent::Closed("service going away".to_string()));
        }

        let content = self.server_content?;
        let parts: Vec<UpstreamPart> = content
            .model_turn
            .map(|turn| turn.parts.into_iter().filter_map(Part::into_upstream).collect())
            .unwrap_or_default();

        if parts.is_empty() && !content.turn_complete {
            return None;
        }

        Some(UpstreamEvent::Content(ServerContent {
            parts,
            turn_complete: content.turn_complete,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_serialization() {
        let json = serde_json::to_string(&SetupMessage::new("models/test")).unwrap();

        assert_eq!(
            json,
            r#"{"setup":{"model":"models/test","generationConfig":{"responseModalities":["AUDIO"]}}}"#
        );
    }

    #[test]
    fn test_setup_with_options() {
        let setup = SetupMessage::new("models/test")
            .with_modalities(vec!["TEXT".to_string()])
            .with_system_instruction("Be brief");

        let json = serde_json::to_string(&setup).unwrap();

        assert!(json.contains(r#""responseModalities":["TEXT"]"#));
        assert!(json.contains(r#""systemInstruction":{"parts":[{"text":"Be brief"}]}"#));
    }

    #[test]
    fn test_text_content_serialization() {
        let msg = ClientMessage::from(UpstreamContent::Text("hi".to_string()));

        let json = serde_json::to_string(&msg).unwrap();

        assert_eq!(
            json,
            r#"{"clientContent":{"turns":[{"role":"user","parts":[{"text":"hi"}]}],"turnComplete":true}}"#
        );
    }

    #[test]
    fn test_audio_content_serialization() {
        let chunk = EncodedChunk::new("AAA=", "audio/pcm;rate=16000");
        let msg = ClientMessage::from(UpstreamContent::Audio(chunk));

        let json = serde_json::to_string(&msg).unwrap();

        assert_eq!(
            json,
            r#"{"realtimeInput":{"mediaChunks":[{"data":"AAA=","mimeType":"audio/pcm;rate=16000"}]}}"#
        );
    }

    #[test]
    fn test_setup_complete() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();

        assert!(msg.is_setup_complete());
        assert_eq!(msg.into_event(), None);
    }

    #[test]
    fn test_server_content_parts() {
        let json = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}},
                        {"text": "hello"}
                    ]
                }
            }
        }"#;

        let msg: ServerMessage = serde_json::from_str(json).unwrap();

        match msg.into_event() {
            Some(UpstreamEvent::Content(content)) => {
                assert_eq!(content.parts.len(), 2);
                assert_eq!(
                    content.parts[0],
                    UpstreamPart::InlineAudio(EncodedChunk::new("AAA=", "audio/pcm;rate=24000"))
                );
                assert_eq!(content.parts[1], UpstreamPart::Text("hello".to_string()));
                assert!(!content.turn_complete);
            }
            other => panic!("Expected content, got {:?}", other),
        }
    }

    #[test]
    fn test_turn_complete_without_parts() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"serverContent":{"turnComplete":true}}"#).unwrap();

        assert_eq!(
            msg.into_event(),
            Some(UpstreamEvent::Content(ServerContent {
                parts: vec![],
                turn_complete: true,
            }))
        );
    }

    #[test]
    fn test_empty_parts_are_dropped() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"serverContent":{"modelTurn":{"parts":[{}, {"text":""}]}}}"#)
                .unwrap();

        assert_eq!(msg.into_event(), None);
    }

    #[test]
    fn test_error_message() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"error":{"code":429,"message":"quota exceeded"}}"#).unwrap();

        assert_eq!(
            msg.into_event(),
            Some(UpstreamEvent::Error("quota exceeded (code 429)".to_string()))
        );
    }

    #[test]
    fn test_go_away() {
        let msg: ServerMessage = serde_json::from_str(r#"{"goAway":{"timeLeft":"5s"}}"#).unwrap();

        assert!(matches!(msg.into_event(), Some(UpstreamEvent::Closed(_))));
    }
}
