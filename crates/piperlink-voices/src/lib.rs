//! File-backed voice registry.
//!
//! Voices are Piper model pairs (`<name>.onnx` + `<name>.onnx.json`) found in
//! a list of data directories. A `voices.json` catalog, from the download
//! directory or else the copy compiled in, contributes aliases, descriptions,
//! expected file sizes and the list of voices that could be installed.

#![deny(unused_crate_dependencies)]

mod catalog;
mod locate;
mod model_config;
mod registry;

pub use catalog::{CatalogFile, CatalogLanguage, CatalogVoice, VoiceCatalog, CATALOG_FILE_NAME};
pub use locate::{find_voice, installed_voice_names, VoiceFiles};
pub use model_config::ModelConfig;
pub use registry::FileVoiceRegistry;

#[cfg(test)]
use tempfile as _;
