//! Piper engine backend.
//!
//! [`PiperBackend`] implements the engine port by spawning the `piper`
//! binary in one of two modes:
//!
//! - one-shot: one process per job, raw PCM on stdout, done at exit
//! - persistent: one process per voice, WAV file per job, done when Piper
//!   echoes the output path

mod command;
mod one_shot;
mod persistent;
mod wav;

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::debug;

use piperlink_core::{EngineBackend, EngineError, EngineMode, EngineProcess, EngineSpec};

pub use command::{piper_args, piper_command};
pub use one_shot::OneShotProcess;
pub use persistent::PersistentProcess;
pub use wav::WavStream;

use crate::process::spawn_stderr_logger;

/// A freshly spawned child with its pipes taken.
pub(crate) struct Spawned {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    label: String,
}

/// Spawns Piper processes from a fixed binary path.
#[derive(Debug, Clone)]
pub struct PiperBackend {
    piper_path: PathBuf,
}

impl PiperBackend {
    pub fn new(piper_path: impl Into<PathBuf>) -> Self {
        Self {
            piper_path: piper_path.into(),
        }
    }

    pub fn piper_path(&self) -> &Path {
        &self.piper_path
    }

    fn spawn_child(
        &self,
        spec: &EngineSpec,
        output_dir: Option<&Path>,
    ) -> Result<Spawned, EngineError> {
        let mut child = piper_command(&self.piper_path, spec, output_dir)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => EngineError::BinaryNotFound(self.piper_path.clone()),
                _ => EngineError::SpawnFailed(format!("{}: {e}", self.piper_path.display())),
            })?;

        let label = format!(
            "piper[{}]",
            child.id().map_or_else(|| "?".to_string(), |pid| pid.to_string())
        );

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(EngineError::SpawnFailed("missing stdio pipes".to_string()));
        };
        spawn_stderr_logger(stderr, label.clone());

        debug!(
            engine = %label,
            voice = %spec.voice.id,
            mode = %spec.params.mode,
            "Spawned engine"
        );

        Ok(Spawned {
            child,
            stdin,
            stdout,
            label,
        })
    }
}

#[async_trait]
impl EngineBackend for PiperBackend {
    async fn spawn(&self, spec: &EngineSpec) -> Result<Box<dyn EngineProcess>, EngineError> {
        match spec.params.mode {
            EngineMode::OneShot => {
                let spawned = self.spawn_child(spec, None)?;
                Ok(Box::new(OneShotProcess::new(spawned, spec.format())))
            }
            EngineMode::Persistent => {
                let output_dir = tempfile::Builder::new()
                    .prefix("piperlink-")
                    .tempdir()
                    .map_err(|e| EngineError::SpawnFailed(format!("output directory: {e}")))?;
                let spawned = self.spawn_child(spec, Some(output_dir.path()))?;
                Ok(Box::new(PersistentProcess::new(
                    spawned,
                    output_dir,
                    spec.format(),
                )))
            }
        }
    }
}
