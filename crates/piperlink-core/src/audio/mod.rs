//! Audio framing.

mod framer;

pub use framer::{AudioFramer, DEFAULT_SAMPLES_PER_CHUNK};
