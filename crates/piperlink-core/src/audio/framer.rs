//! Sample-aligned chunking of a raw PCM byte stream.
//!
//! The framer holds back one complete chunk so the final chunk of a request
//! can be marked terminal without emitting an empty trailer.

use tracing::warn;

use crate::domain::{AudioChunk, AudioFormat};

/// Samples per chunk when neither the client nor the config says otherwise.
pub const DEFAULT_SAMPLES_PER_CHUNK: usize = 1024;

/// Turns raw engine output into [`AudioChunk`]s.
///
/// Feed bytes with [`push`](Self::push) as they arrive, then call
/// [`finish`](Self::finish) once at end-of-stream.
#[derive(Debug)]
pub struct AudioFramer {
    format: AudioFormat,
    max_chunk_bytes: usize,
    buffer: Vec<u8>,
    held: Option<Vec<u8>>,
    next_seq: u64,
    finished: bool,
}

impl AudioFramer {
    /// Create a framer emitting chunks of at most `samples_per_chunk` sample
    /// frames. A value of 0 is treated as 1.
    #[must_use]
    pub fn new(format: AudioFormat, samples_per_chunk: usize) -> Self {
        let max_chunk_bytes = samples_per_chunk.max(1) * format.frame_bytes();
        Self {
            format,
            max_chunk_bytes,
            buffer: Vec::with_capacity(max_chunk_bytes),
            held: None,
            next_seq: 0,
            finished: false,
        }
    }

    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    #[must_use]
    pub const fn max_chunk_bytes(&self) -> usize {
        self.max_chunk_bytes
    }

    /// Number of chunks emitted so far.
    #[must_use]
    pub const fn emitted(&self) -> u64 {
        self.next_seq
    }

    /// Append raw bytes and return every chunk that is now known not to be
    /// the last one.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<AudioChunk> {
        if self.finished {
            warn!(bytes = bytes.len(), "Audio received after end of stream; ignoring");
            return Vec::new();
        }

        self.buffer.extend_from_slice(bytes);

        let mut out = Vec::new();
        while self.buffer.len() >= self.max_chunk_bytes {
            let rest = self.buffer.split_off(self.max_chunk_bytes);
            let full = std::mem::replace(&mut self.buffer, rest);
            if let Some(prev) = self.held.replace(full) {
                out.push(self.emit(prev, false));
            }
        }
        out
    }

    /// Flush at end-of-stream.
    ///
    /// Returns the remaining chunks; the last one is marked terminal. If the
    /// stream produced no audio at all a single empty terminal chunk is
    /// returned so the consumer still sees format metadata and an end marker.
    /// Calling `finish` twice returns nothing the second time.
    pub fn finish(&mut self) -> Vec<AudioChunk> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let frame = self.format.frame_bytes();
        let partial = self.buffer.len() % frame;
        if partial != 0 {
            warn!(
                dropped_bytes = partial,
                frame_bytes = frame,
                "Dropping trailing partial sample frame"
            );
            self.buffer.truncate(self.buffer.len() - partial);
        }

        let tail = std::mem::take(&mut self.buffer);
        let mut out = Vec::with_capacity(2);
        match (self.held.take(), tail.is_empty()) {
            (Some(held), true) => out.push(self.emit(held, true)),
            (Some(held), false) => {
                out.push(self.emit(held, false));
                out.push(self.emit(tail, true));
            }
            (None, _) => out.push(self.emit(tail, true)),
        }
        out
    }

    fn emit(&mut self, payload: Vec<u8>, is_last: bool) -> AudioChunk {
        let seq = self.next_seq;
        self.next_seq += 1;
        AudioChunk {
            seq,
            payload,
            format: (seq == 0).then_some(self.format),
            is_last,
        }
    }
}
