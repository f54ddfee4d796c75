//! Typed client and server events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use piperlink_core::{AudioFormat, OutputHints};

use super::error::ProtocolError;
use super::event::Event;

// ============================================================================
// Client → server
// ============================================================================

/// Voice selection inside a `synthesize` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizeVoice {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Speaker name or numeric id; numbers are accepted as strings.
    #[serde(default, deserialize_with = "string_or_number")]
    pub speaker: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "speaker must be a string or number, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synthesize {
    pub text: String,
    #[serde(default)]
    pub voice: Option<SynthesizeVoice>,
    /// Optional output-format hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputHints>,
}

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Describe,
    Synthesize(Synthesize),
    Ping { text: Option<String> },
}

/// Event types only a server may send.
const SERVER_EVENTS: &[&str] = &[
    "info",
    "audio-start",
    "audio-chunk",
    "audio-stop",
    "error",
    "pong",
];

impl ClientEvent {
    /// Name of the event type, for logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Describe => "describe",
            Self::Synthesize(_) => "synthesize",
            Self::Ping { .. } => "ping",
        }
    }

    /// Interpret a raw event.
    ///
    /// # Errors
    ///
    /// Server-only and unknown event types are rejected, as is a
    /// `synthesize` without a string `text`.
    pub fn parse(event: Event) -> Result<Self, ProtocolError> {
        match event.event_type.as_str() {
            "describe" => Ok(Self::Describe),
            "synthesize" => {
                let mut data = event.data;
                if !matches!(data.get("text"), Some(Value::String(_))) {
                    return Err(ProtocolError::MissingField("text"));
                }
                let output = match data.remove("output") {
                    None | Some(Value::Null) => None,
                    Some(value) => Some(serde_json::from_value::<OutputHints>(value).map_err(
                        |e| ProtocolError::InvalidField {
                            field: "output",
                            message: e.to_string(),
                        },
                    )?),
                };
                let mut synthesize: Synthesize = serde_json::from_value(Value::Object(data))
                    .map_err(|e| ProtocolError::InvalidField {
                        field: "voice",
                        message: e.to_string(),
                    })?;
                synthesize.output = output;
                Ok(Self::Synthesize(synthesize))
            }
            "ping" => Ok(Self::Ping {
                text: event
                    .data
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            other if SERVER_EVENTS.contains(&other) => {
                Err(ProtocolError::ServerOnlyEvent(other.to_string()))
            }
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

// ============================================================================
// Server → client
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsSpeaker {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsVoice {
    pub name: String,
    pub description: Option<String>,
    pub attribution: Attribution,
    pub installed: bool,
    pub version: Option<String>,
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speakers: Option<Vec<TtsSpeaker>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsProgram {
    pub name: String,
    pub description: Option<String>,
    pub attribution: Attribution,
    pub installed: bool,
    pub version: Option<String>,
    pub voices: Vec<TtsVoice>,
}

/// Payload of the `info` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub tts: Vec<TtsProgram>,
}

/// Events the server sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Info(Info),
    AudioStart(AudioFormat),
    AudioChunk {
        format: AudioFormat,
        seq: u64,
        payload: Vec<u8>,
    },
    AudioStop,
    Error { text: String, code: &'static str },
    Pong { text: Option<String> },
}

fn format_data(format: AudioFormat) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("rate".into(), format.rate.into());
    data.insert("width".into(), format.width.into());
    data.insert("channels".into(), format.channels.into());
    data
}

impl ServerEvent {
    #[must_use]
    pub fn into_event(self) -> Event {
        match self {
            Self::Info(info) => Event::new("info").with_data(info),
            Self::AudioStart(format) => Event {
                event_type: "audio-start".into(),
                data: format_data(format),
                payload: Vec::new(),
            },
            Self::AudioChunk {
                format,
                seq,
                payload,
            } => {
                let mut data = format_data(format);
                data.insert("seq".into(), seq.into());
                Event {
                    event_type: "audio-chunk".into(),
                    data,
                    payload,
                }
            }
            Self::AudioStop => Event::new("audio-stop"),
            Self::Error { text, code } => {
                Event::new("error").with_data(serde_json::json!({ "text": text, "code": code }))
            }
            Self::Pong { text } => match text {
                Some(text) => Event::new("pong").with_data(serde_json::json!({ "text": text })),
                None => Event::new("pong"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(event_type: &str, data: Value) -> Event {
        Event::new(event_type).with_data(data)
    }

    #[test]
    fn test_parse_synthesize_with_voice() {
        let parsed = ClientEvent::parse(event(
            "synthesize",
            json!({"text": "Hello", "voice": {"name": "en_US-lessac-medium", "speaker": "2"}}),
        ))
        .unwrap();

        let ClientEvent::Synthesize(synthesize) = parsed else {
            panic!("expected synthesize");
        };
        assert_eq!(synthesize.text, "Hello");
        let voice = synthesize.voice.unwrap();
        assert_eq!(voice.name.as_deref(), Some("en_US-lessac-medium"));
        assert_eq!(voice.speaker.as_deref(), Some("2"));
        assert_eq!(voice.language, None);
    }

    #[test]
    fn test_numeric_speaker_accepted() {
        let parsed = ClientEvent::parse(event(
            "synthesize",
            json!({"text": "Hi", "voice": {"speaker": 4}}),
        ))
        .unwrap();
        let ClientEvent::Synthesize(synthesize) = parsed else {
            panic!("expected synthesize");
        };
        assert_eq!(synthesize.voice.unwrap().speaker.as_deref(), Some("4"));
    }

    #[test]
    fn test_output_hints_parsed() {
        let parsed = ClientEvent::parse(event(
            "synthesize",
            json!({"text": "Hi", "output": {"samples_per_chunk": 256}}),
        ))
        .unwrap();
        let ClientEvent::Synthesize(synthesize) = parsed else {
            panic!("expected synthesize");
        };
        assert_eq!(
            synthesize.output,
            Some(OutputHints {
                samples_per_chunk: Some(256)
            })
        );

        let err = ClientEvent::parse(event(
            "synthesize",
            json!({"text": "Hi", "output": {"samples_per_chunk": -1}}),
        ))
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "output", .. }));
    }

    #[test]
    fn test_parse_synthesize_requires_text() {
        let err = ClientEvent::parse(event("synthesize", json!({"voice": {}}))).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("text")));

        let err = ClientEvent::parse(event("synthesize", json!({"text": 5}))).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("text")));
    }

    #[test]
    fn test_server_only_and_unknown_events_rejected() {
        assert!(matches!(
            ClientEvent::parse(Event::new("audio-chunk")),
            Err(ProtocolError::ServerOnlyEvent(_))
        ));
        assert!(matches!(
            ClientEvent::parse(Event::new("transcribe")),
            Err(ProtocolError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_ping_text_is_optional() {
        assert_eq!(
            ClientEvent::parse(Event::new("ping")).unwrap(),
            ClientEvent::Ping { text: None }
        );
        assert_eq!(
            ClientEvent::parse(event("ping", json!({"text": "x"}))).unwrap(),
            ClientEvent::Ping {
                text: Some("x".into())
            }
        );
    }

    #[test]
    fn test_audio_chunk_event_carries_format_and_seq() {
        let event = ServerEvent::AudioChunk {
            format: AudioFormat::pcm16_mono(22_050),
            seq: 3,
            payload: vec![0; 8],
        }
        .into_event();

        assert_eq!(event.event_type, "audio-chunk");
        assert_eq!(event.data["rate"], 22_050);
        assert_eq!(event.data["width"], 2);
        assert_eq!(event.data["channels"], 1);
        assert_eq!(event.data["seq"], 3);
        assert_eq!(event.payload.len(), 8);
    }

    #[test]
    fn test_error_event_has_code() {
        let event = ServerEvent::Error {
            text: "boom".into(),
            code: "engine-crash",
        }
        .into_event();
        assert_eq!(event.data["code"], "engine-crash");
        assert_eq!(event.data["text"], "boom");
    }
}
