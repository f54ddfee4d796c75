//! Command-line arguments.
//!
//! Every bridge option can also be set through a `PIPERLINK_*` environment
//! variable (or a `.env` file). Options left unset fall back to the
//! [`BridgeConfig`] defaults.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use piperlink_core::paths::normalize_user_path;
use piperlink_core::{BridgeConfig, EngineMode};

use crate::error::CliError;
use crate::logging::LogFormat;

/// Wyoming text-to-speech bridge for the Piper engine.
#[derive(Parser, Debug)]
#[command(name = "piperlink")]
#[command(about = "Serve Piper text to speech over the Wyoming protocol")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub bridge: BridgeArgs,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true, env = "PIPERLINK_DEBUG")]
    pub debug: bool,

    /// Log output format
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = LogFormat::Pretty,
        env = "PIPERLINK_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Print the voices the bridge would announce and exit
    Voices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

/// Bridge options shared by the server and the `voices` command.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct BridgeArgs {
    /// Listen URI: tcp://HOST:PORT, unix://PATH or stdio://
    #[arg(long, global = true, env = "PIPERLINK_URI")]
    pub uri: Option<String>,

    /// Path to the piper executable (looked up on PATH when bare)
    #[arg(long = "piper", global = true, env = "PIPERLINK_PIPER")]
    pub piper: Option<PathBuf>,

    /// Default voice
    #[arg(long, global = true, env = "PIPERLINK_VOICE")]
    pub voice: Option<String>,

    /// Default speaker name or number for multi-speaker voices
    #[arg(long, global = true, env = "PIPERLINK_SPEAKER")]
    pub speaker: Option<String>,

    /// Directory to search for voices (repeatable)
    #[arg(
        long = "data-dir",
        global = true,
        env = "PIPERLINK_DATA_DIRS",
        value_delimiter = ','
    )]
    pub data_dirs: Vec<String>,

    /// Directory holding voices.json and downloaded voices
    #[arg(long, global = true, env = "PIPERLINK_DOWNLOAD_DIR")]
    pub download_dir: Option<String>,

    /// Maximum number of concurrent piper processes
    #[arg(long = "max-piper-procs", global = true, env = "PIPERLINK_MAX_PIPER_PROCS")]
    pub max_piper_procs: Option<usize>,

    /// How piper is driven: one-shot or persistent
    #[arg(long, global = true, env = "PIPERLINK_ENGINE_MODE")]
    pub engine_mode: Option<EngineMode>,

    /// Phoneme length scale (speaking rate)
    #[arg(long, global = true, env = "PIPERLINK_LENGTH_SCALE")]
    pub length_scale: Option<f32>,

    /// Generator noise
    #[arg(long, global = true, env = "PIPERLINK_NOISE_SCALE")]
    pub noise_scale: Option<f32>,

    /// Phoneme width noise
    #[arg(long, global = true, env = "PIPERLINK_NOISE_W")]
    pub noise_w: Option<f32>,

    /// Sentence terminators; the first is appended to text lacking any
    #[arg(long, global = true, env = "PIPERLINK_AUTO_PUNCTUATION")]
    pub auto_punctuation: Option<String>,

    /// Samples per audio chunk
    #[arg(long, global = true, env = "PIPERLINK_SAMPLES_PER_CHUNK")]
    pub samples_per_chunk: Option<usize>,

    /// Maximum wait for the first audio byte, in milliseconds
    #[arg(long, global = true, env = "PIPERLINK_FIRST_BYTE_TIMEOUT_MS")]
    pub first_byte_timeout_ms: Option<u64>,

    /// Maximum wait between audio reads, in milliseconds
    #[arg(long, global = true, env = "PIPERLINK_CHUNK_GAP_TIMEOUT_MS")]
    pub chunk_gap_timeout_ms: Option<u64>,

    /// Grace period between SIGTERM and SIGKILL, in milliseconds
    #[arg(long, global = true, env = "PIPERLINK_TERMINATE_GRACE_MS")]
    pub terminate_grace_ms: Option<u64>,

    /// Accept synthesize before describe
    #[arg(long, global = true, env = "PIPERLINK_NO_STRICT_HANDSHAKE")]
    pub no_strict_handshake: bool,

    /// Announce catalog voices that are not installed
    #[arg(long, global = true, env = "PIPERLINK_SHOW_UNINSTALLED")]
    pub show_uninstalled: bool,
}

impl BridgeArgs {
    /// Layer these arguments over the defaults and validate the result.
    pub fn into_config(self) -> Result<BridgeConfig, CliError> {
        let mut config = BridgeConfig::default();

        if let Some(uri) = self.uri {
            config.uri = uri;
        }
        if let Some(piper) = self.piper {
            config.piper_path = piper;
        }
        if let Some(voice) = self.voice {
            config.voice = voice;
        }
        config.speaker = self.speaker.filter(|s| !s.trim().is_empty());

        config.data_dirs = self
            .data_dirs
            .iter()
            .filter(|dir| !dir.trim().is_empty())
            .map(|dir| normalize_user_path(dir))
            .collect::<Result<_, _>>()
            .map_err(|e| CliError::Config(e.to_string()))?;
        if let Some(dir) = self.download_dir {
            config.download_dir =
                normalize_user_path(&dir).map_err(|e| CliError::Config(e.to_string()))?;
        }

        if let Some(size) = self.max_piper_procs {
            config.pool_size = size;
        }
        if let Some(mode) = self.engine_mode {
            config.engine_mode = mode;
        }
        config.length_scale = self.length_scale;
        config.noise_scale = self.noise_scale;
        config.noise_w = self.noise_w;

        if let Some(punctuation) = self.auto_punctuation {
            config.auto_punctuation = punctuation;
        }
        if let Some(samples) = self.samples_per_chunk {
            config.samples_per_chunk = samples;
        }
        if let Some(ms) = self.first_byte_timeout_ms {
            config.first_byte_timeout_ms = ms;
        }
        if let Some(ms) = self.chunk_gap_timeout_ms {
            config.chunk_gap_timeout_ms = ms;
        }
        if let Some(ms) = self.terminate_grace_ms {
            config.terminate_grace_ms = ms;
        }
        config.strict_handshake = !self.no_strict_handshake;
        config.show_uninstalled = self.show_uninstalled;

        config.validate()?;
        Ok(config)
    }
}
