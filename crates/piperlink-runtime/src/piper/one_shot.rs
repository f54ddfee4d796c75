//! One process per job; end-of-audio is process exit.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::debug;

use piperlink_core::{AudioFormat, EngineError, EngineJob, EngineProcess, EngineRead};

use super::Spawned;
use crate::process::shutdown_child;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Spawned, waiting for its only job.
    Ready,
    /// Job written and stdin closed; audio is streaming.
    Running,
    /// Exited cleanly after its job.
    Done,
    /// Exited with failure or lost its pipes.
    Failed,
}

/// Piper run with `--output-raw`: raw PCM on stdout until the process exits.
pub struct OneShotProcess {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
    format: AudioFormat,
    label: String,
    phase: Phase,
}

impl OneShotProcess {
    pub(super) fn new(spawned: Spawned, format: AudioFormat) -> Self {
        Self {
            child: Some(spawned.child),
            stdin: Some(spawned.stdin),
            stdout: spawned.stdout,
            format,
            label: spawned.label,
            phase: Phase::Ready,
        }
    }

    async fn finish(&mut self) -> Result<EngineRead, EngineError> {
        let Some(child) = self.child.as_mut() else {
            return Err(EngineError::Terminated);
        };

        let status = child.wait().await?;
        if status.success() {
            debug!(engine = %self.label, "Engine finished job");
            self.phase = Phase::Done;
            Ok(EngineRead::End)
        } else {
            self.phase = Phase::Failed;
            Err(EngineError::Exited(format!("{status}")))
        }
    }
}

#[async_trait]
impl EngineProcess for OneShotProcess {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    async fn write(&mut self, job: &EngineJob) -> Result<(), EngineError> {
        if self.phase != Phase::Ready {
            return Err(EngineError::Protocol(
                "one-shot engine accepts a single job".to_string(),
            ));
        }

        let mut line = serde_json::to_vec(job)
            .map_err(|e| EngineError::Protocol(format!("cannot encode job: {e}")))?;
        line.push(b'\n');

        let Some(mut stdin) = self.stdin.take() else {
            return Err(EngineError::Terminated);
        };
        let written = async {
            stdin.write_all(&line).await?;
            stdin.flush().await?;
            stdin.shutdown().await
        }
        .await;
        // Piper starts synthesizing once it sees EOF
        drop(stdin);

        if let Err(e) = written {
            self.phase = Phase::Failed;
            return Err(EngineError::Io(e));
        }

        self.phase = Phase::Running;
        Ok(())
    }

    async fn read(&mut self, max: usize) -> Result<EngineRead, EngineError> {
        match self.phase {
            Phase::Running => {}
            Phase::Done => return Ok(EngineRead::End),
            Phase::Ready => {
                return Err(EngineError::Protocol("no job in progress".to_string()));
            }
            Phase::Failed => return Err(EngineError::Terminated),
        }

        let mut buf = vec![0u8; max.max(1)];
        let n = match self.stdout.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                self.phase = Phase::Failed;
                return Err(EngineError::Io(e));
            }
        };

        if n == 0 {
            return self.finish().await;
        }

        buf.truncate(n);
        Ok(EngineRead::Audio(buf))
    }

    fn is_alive(&mut self) -> bool {
        if self.phase != Phase::Ready {
            return false;
        }
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            _ => {
                self.phase = Phase::Failed;
                false
            }
        }
    }

    async fn terminate(mut self: Box<Self>, grace: Duration) {
        drop(self.stdin.take());
        if let Some(child) = self.child.take() {
            match shutdown_child(child, grace).await {
                Ok(status) => debug!(engine = %self.label, %status, "Engine stopped"),
                Err(e) => debug!(engine = %self.label, error = %e, "Engine shutdown failed"),
            }
        }
    }
}
