//! Core domain types and port definitions for piperlink.
//!
//! This crate has no knowledge of processes, sockets or the wire protocol.
//! It defines:
//!
//! - the domain model (`domain`): voices, synthesis requests, audio chunks
//! - the audio framer (`audio`): sample-aligned chunking of raw PCM
//! - the ports (`ports`): engine and voice-registry traits plus their errors
//! - bridge configuration (`settings`) and default paths (`paths`)
//! - text normalisation applied to incoming synthesis text (`text`)

#![deny(unused_crate_dependencies)]

pub mod audio;
pub mod domain;
pub mod paths;
pub mod ports;
pub mod settings;
pub mod text;

pub use audio::AudioFramer;
pub use domain::{
    AudioChunk, AudioFormat, OutputHints, PreparedRequest, RequestId, ResolvedVoice,
    SynthesisError, SynthesizeRequest, VoiceDescriptor,
};
pub use ports::{
    EngineBackend, EngineError, EngineJob, EngineParams, EngineProcess, EngineRead, EngineSpec,
    RegistryError, VoiceRegistry,
};
pub use settings::{BridgeConfig, ConfigError, EngineMode};
