//! Domain model shared by every piperlink crate.

mod audio;
mod error;
mod request;
mod voice;

pub use audio::{AudioChunk, AudioFormat};
pub use error::SynthesisError;
pub use request::{OutputHints, PreparedRequest, RequestId, SynthesizeRequest};
pub use voice::{ResolvedVoice, VoiceDescriptor};
