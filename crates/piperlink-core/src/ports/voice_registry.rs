//! Voice registry port.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ResolvedVoice, SynthesisError, VoiceDescriptor};

/// Errors that can occur while looking up voices.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No model files exist for the voice.
    #[error("Voice not found: {0}")]
    NotFound(String),

    /// A model config file could not be parsed.
    #[error("Invalid model config {}: {message}", path.display())]
    InvalidConfig { path: PathBuf, message: String },

    /// The voice catalog could not be parsed.
    #[error("Invalid voice catalog {}: {message}", path.display())]
    InvalidCatalog { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RegistryError> for SynthesisError {
    fn from(err: RegistryError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// Source of voice metadata and model locations.
///
/// Consulted at handshake (`list_voices`) and before every dispatch
/// (`resolve`). Implementations must be cheap to call repeatedly.
#[async_trait]
pub trait VoiceRegistry: Send + Sync {
    /// Voices to announce to clients.
    async fn list_voices(&self) -> Result<Vec<VoiceDescriptor>, RegistryError>;

    /// Resolve a voice id (or alias) to installed model files.
    async fn resolve(&self, voice_id: &str) -> Result<ResolvedVoice, RegistryError>;

    /// Drop cached metadata so the next call re-reads from the source.
    async fn refresh(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}
