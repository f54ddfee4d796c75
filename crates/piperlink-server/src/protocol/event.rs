//! The untyped Wyoming event: a type, a JSON object and a binary payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version written into every outgoing header.
pub const PROTOCOL_VERSION: &str = "1.5.2";

/// One framed event as it travels on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub event_type: String,
    pub data: Map<String, Value>,
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Self::default()
        }
    }

    /// Replace the data with `data`, which must serialize to a JSON object.
    /// Anything else leaves the data empty.
    #[must_use]
    pub fn with_data(mut self, data: impl Serialize) -> Self {
        if let Ok(Value::Object(map)) = serde_json::to_value(data) {
            self.data = map;
        }
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

/// The JSON header line preceding data and payload bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub data_length: Option<u64>,
    #[serde(default)]
    pub payload_length: Option<u64>,
    /// Inline data; merged under any separate data block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_with_data_ignores_non_objects() {
        let event = Event::new("ping").with_data(json!(["not", "an", "object"]));
        assert!(event.data.is_empty());

        let event = Event::new("ping").with_data(json!({"text": "hi"}));
        assert_eq!(event.data["text"], "hi");
    }

    #[test]
    fn test_header_allows_missing_lengths() {
        let header: Header = serde_json::from_str(r#"{"type": "describe"}"#).unwrap();
        assert_eq!(header.event_type.as_deref(), Some("describe"));
        assert_eq!(header.data_length, None);
        assert_eq!(header.payload_length, None);
    }
}
