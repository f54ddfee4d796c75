//! Incremental reading of WAV files written by Piper.
//!
//! `hound` parses the header; the sample data is then read in pieces through
//! a tokio file positioned at the start of the data chunk, so a long
//! utterance is never held in memory at once.

use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use piperlink_core::{AudioFormat, EngineError};

/// A WAV file being streamed as raw 16-bit PCM.
#[derive(Debug)]
pub struct WavStream {
    path: PathBuf,
    file: tokio::fs::File,
    remaining: u64,
    format: AudioFormat,
}

impl WavStream {
    /// Open `path` and seek to its sample data.
    pub async fn open(path: &Path) -> Result<Self, EngineError> {
        let invalid = |message: String| {
            EngineError::Protocol(format!("invalid WAV {}: {message}", path.display()))
        };

        let reader = hound::WavReader::new(BufReader::new(std::fs::File::open(path)?))
            .map_err(|e| invalid(e.to_string()))?;
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(invalid(format!(
                "expected 16-bit integer PCM, got {} bits {:?}",
                spec.bits_per_sample, spec.sample_format
            )));
        }

        // len() counts samples across all channels
        let remaining = u64::from(reader.len()) * 2;
        let offset = reader.into_inner().stream_position()?;

        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            remaining,
            format: AudioFormat::new(spec.sample_rate, 2, spec.channels),
        })
    }

    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read up to `max` bytes of sample data; `None` once the data chunk is
    /// exhausted (or the file turns out to be shorter than its header says).
    pub async fn read(&mut self, max: usize) -> Result<Option<Vec<u8>>, EngineError> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let want = usize::try_from(self.remaining).map_or(max, |r| r.min(max)).max(1);
        let mut buf = vec![0u8; want];
        let n = self.file.read(&mut buf).await?;
        if n == 0 {
            self.remaining = 0;
            return Ok(None);
        }

        self.remaining = self.remaining.saturating_sub(n as u64);
        buf.truncate(n);
        Ok(Some(buf))
    }
}
