//! Bridge configuration and validation.
//!
//! `BridgeConfig` is built once at startup (CLI flags, environment, defaults)
//! and injected into every component by value or reference. Nothing reads
//! configuration from global state.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::DEFAULT_SAMPLES_PER_CHUNK;
use crate::paths;
use crate::ports::EngineParams;

/// Default listen address.
pub const DEFAULT_URI: &str = "tcp://127.0.0.1:10200";

/// Default voice announced and used when a request names none.
pub const DEFAULT_VOICE: &str = "en_US-lessac-medium";

/// Upper bound on concurrent engine processes.
pub const MAX_POOL_SIZE: usize = 64;

/// How the bridge drives the engine binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineMode {
    /// One process per request; end-of-audio is process exit.
    #[default]
    OneShot,
    /// Long-lived process; end-of-audio is an in-band terminator line.
    Persistent,
}

impl EngineMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneShot => "one-shot",
            Self::Persistent => "persistent",
        }
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "one-shot" | "oneshot" => Ok(Self::OneShot),
            "persistent" => Ok(Self::Persistent),
            other => Err(ConfigError::InvalidEngineMode(other.to_string())),
        }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Listen URI (`tcp://HOST:PORT`, `unix://PATH` or `stdio://`).
    pub uri: String,

    /// Path to the `piper` executable.
    pub piper_path: PathBuf,

    /// Default voice id.
    pub voice: String,

    /// Default speaker name or number for multi-speaker voices.
    pub speaker: Option<String>,

    /// Directories searched for `<voice>.onnx`. Empty means the download
    /// directory only.
    pub data_dirs: Vec<PathBuf>,

    /// Directory holding `voices.json`; also searched for voices.
    pub download_dir: PathBuf,

    /// Maximum number of concurrent engine processes (1-64).
    pub pool_size: usize,

    pub engine_mode: EngineMode,

    pub length_scale: Option<f32>,
    pub noise_scale: Option<f32>,
    pub noise_w: Option<f32>,

    /// Characters accepted as sentence terminators; the first one is
    /// appended to text that lacks any. Empty disables.
    pub auto_punctuation: String,

    /// Default number of samples per audio chunk.
    pub samples_per_chunk: usize,

    /// Maximum wait for the first byte of audio.
    pub first_byte_timeout_ms: u64,

    /// Maximum wait between consecutive audio reads.
    pub chunk_gap_timeout_ms: u64,

    /// Grace period between SIGTERM and SIGKILL.
    pub terminate_grace_ms: u64,

    /// Require `describe` before `synthesize`.
    pub strict_handshake: bool,

    /// Announce catalog voices that are not installed.
    pub show_uninstalled: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            piper_path: PathBuf::from("piper"),
            voice: DEFAULT_VOICE.to_string(),
            speaker: None,
            data_dirs: Vec::new(),
            download_dir: paths::default_download_dir().unwrap_or_else(|_| PathBuf::from("voices")),
            pool_size: 1,
            engine_mode: EngineMode::OneShot,
            length_scale: None,
            noise_scale: None,
            noise_w: None,
            auto_punctuation: ".?!".to_string(),
            samples_per_chunk: DEFAULT_SAMPLES_PER_CHUNK,
            first_byte_timeout_ms: 30_000,
            chunk_gap_timeout_ms: 10_000,
            terminate_grace_ms: 5_000,
            strict_handshake: true,
            show_uninstalled: false,
        }
    }
}

impl BridgeConfig {
    /// Directories searched for voices, in priority order.
    #[must_use]
    pub fn effective_data_dirs(&self) -> Vec<PathBuf> {
        if self.data_dirs.is_empty() {
            vec![self.download_dir.clone()]
        } else {
            self.data_dirs.clone()
        }
    }

    #[must_use]
    pub const fn engine_params(&self) -> EngineParams {
        EngineParams {
            mode: self.engine_mode,
            length_scale: self.length_scale,
            noise_scale: self.noise_scale,
            noise_w: self.noise_w,
        }
    }

    #[must_use]
    pub const fn first_byte_timeout(&self) -> Duration {
        Duration::from_millis(self.first_byte_timeout_ms)
    }

    #[must_use]
    pub const fn chunk_gap_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_gap_timeout_ms)
    }

    #[must_use]
    pub const fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    /// Check every value is within range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_uri(&self.uri)?;

        if self.piper_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPiperPath);
        }

        if self.voice.trim().is_empty() {
            return Err(ConfigError::EmptyVoice);
        }

        if !(1..=MAX_POOL_SIZE).contains(&self.pool_size) {
            return Err(ConfigError::InvalidPoolSize(self.pool_size));
        }

        for (name, value) in [
            ("length_scale", self.length_scale),
            ("noise_scale", self.noise_scale),
            ("noise_w", self.noise_w),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(ConfigError::InvalidScale { name, value: v });
                }
            }
        }

        if self.samples_per_chunk == 0 {
            return Err(ConfigError::InvalidSamplesPerChunk);
        }

        for (name, ms) in [
            ("first_byte_timeout_ms", self.first_byte_timeout_ms),
            ("chunk_gap_timeout_ms", self.chunk_gap_timeout_ms),
        ] {
            if ms == 0 {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }

        Ok(())
    }
}

fn validate_uri(uri: &str) -> Result<(), ConfigError> {
    let ok = uri == "stdio://"
        || uri
            .strip_prefix("tcp://")
            .is_some_and(|rest| rest.rsplit_once(':').is_some())
        || uri.strip_prefix("unix://").is_some_and(|rest| !rest.is_empty());

    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidUri(uri.to_string()))
    }
}

/// Configuration validation error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("Unsupported listen URI '{0}' (expected tcp://HOST:PORT, unix://PATH or stdio://)")]
    InvalidUri(String),

    #[error("Piper path cannot be empty")]
    EmptyPiperPath,

    #[error("Default voice cannot be empty")]
    EmptyVoice,

    #[error("Pool size must be between 1 and {MAX_POOL_SIZE}, got {0}")]
    InvalidPoolSize(usize),

    #[error("{name} must be a positive number, got {value}")]
    InvalidScale { name: &'static str, value: f32 },

    #[error("Samples per chunk must be at least 1")]
    InvalidSamplesPerChunk,

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("Unknown engine mode '{0}' (expected one-shot or persistent)")]
    InvalidEngineMode(String),
}
