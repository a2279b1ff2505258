//! Typed wire events for the OpenAI Realtime API.
//!
//! Every inbound frame is decoded exactly once into [`ServerEvent`] and then
//! matched exhaustively by the session state machine; event types we receive
//! but do not act on decode to [`ServerEvent::Unhandled`] rather than failing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event sent from this client to the server, discriminated by the
/// `type` field on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Configure the session: modalities, voice, audio formats, turn
    /// detection, and the tool declarations forwarded from the registry.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Append a chunk of base64-encoded PCM16 microphone audio.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    /// Add an item to the conversation; used here to return tool results.
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    /// Ask the model to generate a response for the current conversation.
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseParams },
}

impl ClientEvent {
    /// A `response.create` requesting the default text+audio modalities.
    pub fn response_create() -> Self {
        Self::ResponseCreate {
            response: ResponseParams {
                modalities: vec!["text".into(), "audio".into()],
            },
        }
    }

    /// A `conversation.item.create` carrying a function-call result.
    pub fn function_output(call_id: String, output: String) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput { call_id, output },
        }
    }
}

/// An event received from the server, discriminated by the `type` field.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: SessionInfo },

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "response.created")]
    ResponseCreated,

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded,

    /// A chunk of base64-encoded PCM16 assistant audio.
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    /// A fragment of the assistant's spoken-output transcript.
    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta { delta: String },

    /// A fragment of a streaming function-call argument payload.
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { call_id: String, delta: String },

    /// The function-call arguments are complete; `arguments` is the full
    /// JSON-encoded payload.
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: String,
        arguments: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "error")]
    Error { error: ErrorDetails },

    /// Any event type this client does not act on.
    #[serde(other)]
    Unhandled,
}

/// The server-assigned session identity carried by `session.created`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub id: Option<String>,
}

/// The payload of a server `error` event.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ErrorDetails {
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Server-side rejection code for a `response.create` that raced an already
/// active response. Recovered locally, never surfaced as a failure.
pub const ERR_ACTIVE_RESPONSE: &str = "conversation_already_has_active_response";

/// A conversation item created by this client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    FunctionCallOutput { call_id: String, output: String },
}

/// Parameters for a `response.create` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseParams {
    pub modalities: Vec<String>,
}

/// Session configuration sent in `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: AudioTranscription,
    pub turn_detection: TurnDetection,
    pub tools: Vec<ToolDefinition>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            modalities: vec!["text".into(), "audio".into()],
            instructions: "You are a helpful voice assistant. Be conversational and concise."
                .into(),
            voice: "alloy".into(),
            input_audio_format: "pcm16".into(),
            output_audio_format: "pcm16".into(),
            input_audio_transcription: AudioTranscription {
                model: "whisper-1".into(),
            },
            turn_detection: TurnDetection::default(),
            tools: Vec::new(),
        }
    }
}

/// Input-transcription settings for the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioTranscription {
    pub model: String,
}

/// Server-side voice-activity turn detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
    },
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self::ServerVad {
            threshold: 0.6,
            prefix_padding_ms: 500,
            silence_duration_ms: 800,
        }
    }
}

/// A tool declaration forwarded verbatim into the `session.update` tool list.
///
/// `parameters` is an untyped JSON schema; its shape is owned by the tool
/// registry, not by this crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            kind: "function".into(),
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_audio_delta() {
        let raw = r#"{"type":"response.audio.delta","response_id":"r1","delta":"AAAA"}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            ServerEvent::AudioDelta {
                delta: "AAAA".into()
            }
        );
    }

    #[test]
    fn decodes_function_call_done() {
        let raw = r#"{
            "type": "response.function_call_arguments.done",
            "call_id": "call_42",
            "name": "get_time",
            "arguments": "{\"timezone\":\"local\"}"
        }"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        match event {
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                assert_eq!(call_id, "call_42");
                assert_eq!(name, "get_time");
                assert_eq!(arguments, "{\"timezone\":\"local\"}");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decodes_error_with_code() {
        let raw = r#"{"type":"error","error":{"code":"conversation_already_has_active_response","message":"busy"}}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        match event {
            ServerEvent::Error { error } => {
                assert_eq!(error.code.as_deref(), Some(ERR_ACTIVE_RESPONSE));
                assert_eq!(error.message.as_deref(), Some("busy"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_unhandled() {
        let raw = r#"{"type":"rate_limits.updated","rate_limits":[]}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event, ServerEvent::Unhandled);
    }

    #[test]
    fn unit_variants_tolerate_extra_fields() {
        let raw = r#"{"type":"response.done","response":{"id":"r1","status":"completed"}}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event, ServerEvent::ResponseDone);
    }

    #[test]
    fn session_update_includes_tool_declarations() {
        let mut config = SessionConfig::default();
        config.tools.push(ToolDefinition::function(
            "get_time",
            "Tell the current time",
            json!({"type": "object", "properties": {}, "required": []}),
        ));
        let encoded =
            serde_json::to_value(ClientEvent::SessionUpdate { session: config }).unwrap();
        assert_eq!(encoded["type"], "session.update");
        assert_eq!(encoded["session"]["voice"], "alloy");
        assert_eq!(encoded["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(encoded["session"]["tools"][0]["name"], "get_time");
        assert_eq!(encoded["session"]["tools"][0]["type"], "function");
    }

    #[test]
    fn function_output_carries_call_id() {
        let encoded = serde_json::to_value(ClientEvent::function_output(
            "call_42".into(),
            "it is noon".into(),
        ))
        .unwrap();
        assert_eq!(encoded["type"], "conversation.item.create");
        assert_eq!(encoded["item"]["type"], "function_call_output");
        assert_eq!(encoded["item"]["call_id"], "call_42");
        assert_eq!(encoded["item"]["output"], "it is noon");
    }

    #[test]
    fn response_create_requests_both_modalities() {
        let encoded = serde_json::to_value(ClientEvent::response_create()).unwrap();
        assert_eq!(encoded["type"], "response.create");
        assert_eq!(encoded["response"]["modalities"], json!(["text", "audio"]));
    }
}
