//! Audio format metadata and framed audio chunks.

use serde::{Deserialize, Serialize};

/// PCM layout of a stream of audio bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Samples per second.
    pub rate: u32,
    /// Bytes per sample (2 for 16-bit PCM).
    pub width: u16,
    /// Interleaved channel count.
    pub channels: u16,
}

impl AudioFormat {
    /// Create a new format description.
    #[must_use]
    pub const fn new(rate: u32, width: u16, channels: u16) -> Self {
        Self {
            rate,
            width,
            channels,
        }
    }

    /// 16-bit mono PCM, which is what Piper emits with `--output-raw`.
    #[must_use]
    pub const fn pcm16_mono(rate: u32) -> Self {
        Self::new(rate, 2, 1)
    }

    /// Size in bytes of one sample frame (one sample for every channel).
    ///
    /// Never zero, so it is always safe to use as a divisor.
    #[must_use]
    pub const fn frame_bytes(&self) -> usize {
        let bytes = self.width as usize * self.channels as usize;
        if bytes == 0 { 1 } else { bytes }
    }
}

/// One framed unit of synthesized audio.
///
/// Produced by [`AudioFramer`](crate::audio::AudioFramer); sequence numbers
/// start at 0 and are gapless within one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Position of this chunk within its request.
    pub seq: u64,
    /// Raw PCM bytes, always a whole number of sample frames.
    pub payload: Vec<u8>,
    /// Format metadata, present on the first chunk of a request only.
    pub format: Option<AudioFormat>,
    /// True for the final chunk of a request.
    pub is_last: bool,
}

impl AudioChunk {
    /// Number of sample frames carried by this chunk.
    #[must_use]
    pub fn frames(&self, format: &AudioFormat) -> usize {
        self.payload.len() / format.frame_bytes()
    }
}
