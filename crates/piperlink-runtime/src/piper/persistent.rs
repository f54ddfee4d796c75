//! Long-lived Piper process; end-of-audio is the output path echoed on
//! stdout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, warn};

use piperlink_core::{AudioFormat, EngineError, EngineJob, EngineProcess, EngineRead};

use super::Spawned;
use super::wav::WavStream;
use crate::process::shutdown_child;

enum Job {
    /// Text submitted; waiting for Piper to report the finished file.
    Pending { output: PathBuf },
    /// File reported; streaming its samples.
    Streaming(WavStream),
}

/// Piper run with `--json-input` that synthesizes one WAV file per job.
pub struct PersistentProcess {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    output_dir: TempDir,
    format: AudioFormat,
    label: String,
    job: Option<Job>,
    line: Vec<u8>,
    jobs_started: u64,
    broken: bool,
}

impl PersistentProcess {
    pub(super) fn new(spawned: Spawned, output_dir: TempDir, format: AudioFormat) -> Self {
        Self {
            child: Some(spawned.child),
            stdin: Some(spawned.stdin),
            stdout: BufReader::new(spawned.stdout),
            output_dir,
            format,
            label: spawned.label,
            job: None,
            line: Vec::new(),
            jobs_started: 0,
            broken: false,
        }
    }

    /// Read stdout until Piper reports `output`.
    ///
    /// Partial lines survive in `self.line` if the future is dropped, so a
    /// cancelled wait can be resumed by the next read.
    async fn await_output(&mut self, output: &Path) -> Result<(), EngineError> {
        loop {
            if !self.line.ends_with(b"\n") {
                let n = self.stdout.read_until(b'\n', &mut self.line).await?;
                if n == 0 {
                    return Err(EngineError::Exited("engine closed stdout".to_string()));
                }
                if !self.line.ends_with(b"\n") {
                    continue;
                }
            }

            let reported = String::from_utf8_lossy(&self.line).trim().to_string();
            self.line.clear();
            if reported.is_empty() {
                continue;
            }
            if Path::new(&reported) == output {
                return Ok(());
            }
            debug!(engine = %self.label, line = %reported, "Ignoring unexpected engine output");
        }
    }

    fn fail<T>(&mut self, err: EngineError) -> Result<T, EngineError> {
        self.broken = true;
        self.job = None;
        Err(err)
    }
}

#[async_trait]
impl EngineProcess for PersistentProcess {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    async fn write(&mut self, job: &EngineJob) -> Result<(), EngineError> {
        if self.job.is_some() {
            return Err(EngineError::Protocol("job already in progress".to_string()));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(EngineError::Terminated);
        };

        self.jobs_started += 1;
        let output = self
            .output_dir
            .path()
            .join(format!("job-{}.wav", self.jobs_started));

        let mut line = json!({ "text": job.text, "output_file": output });
        if let Some(speaker_id) = job.speaker_id {
            line["speaker_id"] = json!(speaker_id);
        }
        let mut bytes = line.to_string().into_bytes();
        bytes.push(b'\n');

        let written = async {
            stdin.write_all(&bytes).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            return self.fail(EngineError::Io(e));
        }

        self.job = Some(Job::Pending { output });
        Ok(())
    }

    async fn read(&mut self, max: usize) -> Result<EngineRead, EngineError> {
        loop {
            match self.job.as_mut() {
                None => return Err(EngineError::Protocol("no job in progress".to_string())),
                Some(Job::Pending { output }) => {
                    let output = output.clone();
                    if let Err(e) = self.await_output(&output).await {
                        return self.fail(e);
                    }
                    let wav = match WavStream::open(&output).await {
                        Ok(wav) => wav,
                        Err(e) => return self.fail(e),
                    };
                    if wav.format() != self.format {
                        warn!(
                            engine = %self.label,
                            expected = ?self.format,
                            actual = ?wav.format(),
                            "Engine output format differs from model config"
                        );
                    }
                    self.job = Some(Job::Streaming(wav));
                }
                Some(Job::Streaming(wav)) => match wav.read(max).await {
                    Ok(Some(bytes)) => return Ok(EngineRead::Audio(bytes)),
                    Ok(None) => {
                        let path = wav.path().to_path_buf();
                        self.job = None;
                        if let Err(e) = tokio::fs::remove_file(&path).await {
                            debug!(path = %path.display(), error = %e, "Failed to remove output file");
                        }
                        return Ok(EngineRead::End);
                    }
                    Err(e) => return self.fail(e),
                },
            }
        }
    }

    fn is_alive(&mut self) -> bool {
        if self.broken || self.job.is_some() {
            return false;
        }
        matches!(self.child.as_mut().map(Child::try_wait), Some(Ok(None)))
    }

    async fn terminate(mut self: Box<Self>, grace: Duration) {
        // Closing stdin lets Piper exit on its own before the signal lands
        drop(self.stdin.take());
        if let Some(child) = self.child.take() {
            match shutdown_child(child, grace).await {
                Ok(status) => debug!(engine = %self.label, %status, "Engine stopped"),
                Err(e) => debug!(engine = %self.label, error = %e, "Engine shutdown failed"),
            }
        }
    }
}
