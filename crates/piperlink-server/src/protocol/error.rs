use std::io;

use thiserror::Error;

/// Errors raised while reading, parsing or sequencing client events.
///
/// Every variant except [`Io`](Self::Io) closes the session with a
/// `protocol-error`; `Io` is a transport failure.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Transport error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Header line exceeds {limit} bytes")]
    HeaderTooLong { limit: usize },

    #[error("{what} length {length} exceeds limit of {limit} bytes")]
    TooLarge {
        what: &'static str,
        length: u64,
        limit: usize,
    },

    #[error("Connection closed in the middle of an event")]
    Truncated,

    #[error("Event data must be a JSON object")]
    DataNotObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field '{field}': {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    #[error("Event '{0}' is only sent by servers")]
    ServerOnlyEvent(String),

    #[error("Event '{event}' not allowed while {state}")]
    OutOfOrder { event: String, state: &'static str },
}

impl ProtocolError {
    /// Error code sent in the `error` event before closing.
    pub const CODE: &'static str = "protocol-error";

    /// Whether the error is a broken connection rather than a misbehaving
    /// client.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
