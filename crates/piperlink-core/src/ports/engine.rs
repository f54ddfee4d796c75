//! Engine port: one external synthesis process.
//!
//! An [`EngineBackend`] spawns processes bound to one [`EngineSpec`]; an
//! [`EngineProcess`] accepts jobs and yields raw PCM until an end marker.
//! How end-of-audio is detected (process exit or in-band terminator) is the
//! implementation's business.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{AudioFormat, ResolvedVoice, SynthesisError};
use crate::settings::EngineMode;

/// Engine tuning shared by every process of one bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineParams {
    pub mode: EngineMode,
    pub length_scale: Option<f32>,
    pub noise_scale: Option<f32>,
    pub noise_w: Option<f32>,
}

/// Everything needed to spawn a process: which voice, with which tuning.
///
/// Two processes with equal specs are interchangeable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSpec {
    pub voice: ResolvedVoice,
    pub params: EngineParams,
}

impl EngineSpec {
    #[must_use]
    pub const fn new(voice: ResolvedVoice, params: EngineParams) -> Self {
        Self { voice, params }
    }

    /// Output format the process will produce.
    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        AudioFormat::pcm16_mono(self.voice.sample_rate)
    }
}

/// One unit of work fed to a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineJob {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<i64>,
}

/// Result of one read from a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineRead {
    /// Raw PCM bytes, in production order. Never empty.
    Audio(Vec<u8>),
    /// End-of-audio for the current job.
    End,
}

/// Errors raised by engine processes.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine binary does not exist or is not executable.
    #[error("Engine binary not found: {}", .0.display())]
    BinaryNotFound(PathBuf),

    /// The process could not be started.
    #[error("Failed to spawn engine: {0}")]
    SpawnFailed(String),

    /// I/O on the process pipes failed.
    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The process exited while a job was in flight.
    #[error("Engine exited unexpectedly: {0}")]
    Exited(String),

    /// The process produced output that violates its protocol.
    #[error("Engine protocol violation: {0}")]
    Protocol(String),

    /// The process was already terminated.
    #[error("Engine terminated")]
    Terminated,
}

impl EngineError {
    /// Whether the error happened before any work could start.
    #[must_use]
    pub const fn is_spawn_failure(&self) -> bool {
        matches!(self, Self::BinaryNotFound(_) | Self::SpawnFailed(_))
    }
}

impl From<EngineError> for SynthesisError {
    fn from(err: EngineError) -> Self {
        if err.is_spawn_failure() {
            Self::EngineUnavailable(err.to_string())
        } else {
            Self::EngineCrash(err.to_string())
        }
    }
}

/// A running engine process bound to one voice.
#[async_trait]
pub trait EngineProcess: Send {
    /// PCM layout of the audio this process emits.
    fn format(&self) -> AudioFormat;

    /// OS process id, when there is one.
    fn pid(&self) -> Option<u32>;

    /// Submit a job. Must be followed by reads until [`EngineRead::End`].
    async fn write(&mut self, job: &EngineJob) -> Result<(), EngineError>;

    /// Read up to `max` bytes of audio for the current job.
    async fn read(&mut self, max: usize) -> Result<EngineRead, EngineError>;

    /// Whether the process can take another job.
    fn is_alive(&mut self) -> bool;

    /// Stop the process: polite request first, forced kill after `grace`.
    async fn terminate(self: Box<Self>, grace: Duration);
}

/// Factory for engine processes.
#[async_trait]
pub trait EngineBackend: Send + Sync {
    /// Spawn a new process for `spec`.
    async fn spawn(&self, spec: &EngineSpec) -> Result<Box<dyn EngineProcess>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_errors_map_to_unavailable() {
        let err: SynthesisError = EngineError::SpawnFailed("no such file".into()).into();
        assert_eq!(err.code(), "engine-unavailable");
    }

    #[test]
    fn test_runtime_errors_map_to_crash() {
        let err: SynthesisError = EngineError::Exited("status 1".into()).into();
        assert_eq!(err.code(), "engine-crash");
        assert!(err.discards_worker());
    }

    #[test]
    fn test_job_serializes_without_speaker() {
        let job = EngineJob {
            text: "Hello.".into(),
            speaker_id: None,
        };
        assert_eq!(serde_json::to_string(&job).unwrap(), r#"{"text":"Hello."}"#);
    }
}
