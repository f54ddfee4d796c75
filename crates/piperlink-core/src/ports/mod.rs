//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define what the bridge expects from infrastructure: an engine that
//! can be spawned and fed text, and a registry that knows which voices exist.
//! They use only domain types; no process or filesystem details leak through.

pub mod engine;
pub mod voice_registry;

pub use engine::{
    EngineBackend, EngineError, EngineJob, EngineParams, EngineProcess, EngineRead, EngineSpec,
};
pub use voice_registry::{RegistryError, VoiceRegistry};
