//! Synthesis requests.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::SynthesisError;
use super::voice::ResolvedVoice;

/// Unique identifier of one synthesis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate a fresh random request id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optional client hints about the shape of the returned audio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputHints {
    /// Preferred number of samples per audio chunk.
    pub samples_per_chunk: Option<usize>,
}

/// One synthesis job as received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizeRequest {
    pub id: RequestId,
    /// Text to speak, already normalised.
    pub text: String,
    /// Voice identifier to resolve through the registry.
    pub voice: String,
    /// Speaker name or number for multi-speaker voices.
    pub speaker: Option<String>,
    pub hints: OutputHints,
}

impl SynthesizeRequest {
    /// Create a request with a fresh id and no speaker or hints.
    pub fn new(text: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            text: text.into(),
            voice: voice.into(),
            speaker: None,
            hints: OutputHints::default(),
        }
    }

    /// Select a speaker.
    #[must_use]
    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    /// Attach output hints.
    #[must_use]
    pub const fn with_hints(mut self, hints: OutputHints) -> Self {
        self.hints = hints;
        self
    }
}

/// A request whose voice and speaker have been validated against the
/// registry. Only prepared requests reach the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub request: SynthesizeRequest,
    pub voice: ResolvedVoice,
    pub speaker_id: Option<i64>,
}

impl PreparedRequest {
    /// Validate text and speaker against a resolved voice.
    ///
    /// # Errors
    ///
    /// Returns [`SynthesisError::InvalidRequest`] for empty text, a zero
    /// chunk size hint or an unknown speaker.
    pub fn prepare(
        request: SynthesizeRequest,
        voice: ResolvedVoice,
    ) -> Result<Self, SynthesisError> {
        if request.text.trim().is_empty() {
            return Err(SynthesisError::InvalidRequest(
                "text must not be empty".to_string(),
            ));
        }
        if request.hints.samples_per_chunk == Some(0) {
            return Err(SynthesisError::InvalidRequest(
                "samples_per_chunk must be at least 1".to_string(),
            ));
        }

        let speaker_id = match request.speaker.as_deref() {
            None => None,
            Some(s) if s.trim().is_empty() => None,
            Some(s) => Some(voice.speaker_id(s).ok_or_else(|| {
                SynthesisError::InvalidRequest(format!(
                    "unknown speaker '{s}' for voice '{}'",
                    voice.id
                ))
            })?),
        };

        Ok(Self {
            request,
            voice,
            speaker_id,
        })
    }

    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.request.id
    }
}
