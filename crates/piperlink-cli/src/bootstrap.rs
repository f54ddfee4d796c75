//! CLI bootstrap - the composition root.
//!
//! This is the only place where concrete implementations are chosen:
//! - the Piper engine backend (via piperlink-runtime)
//! - the file-backed voice registry (via piperlink-voices)
//! - the worker pool and dispatcher
//! - the session context shared by every connection (via piperlink-server)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use piperlink_core::{BridgeConfig, VoiceRegistry};
use piperlink_runtime::{PiperBackend, SynthesisDispatcher};
use piperlink_server::{SessionConfig, SessionContext};
use piperlink_voices::FileVoiceRegistry;

use crate::error::CliError;

/// Everything the serve command needs, fully wired.
pub struct Bridge {
    pub config: BridgeConfig,
    pub registry: Arc<dyn VoiceRegistry>,
    pub dispatcher: SynthesisDispatcher,
}

impl Bridge {
    pub fn session_context(&self) -> Arc<SessionContext> {
        Arc::new(SessionContext::new(
            self.dispatcher.clone(),
            Arc::clone(&self.registry),
            SessionConfig::from_bridge(&self.config),
        ))
    }
}

/// Locate the piper executable.
///
/// Paths with a directory component must point at an existing file; bare
/// names are looked up on `PATH`.
pub fn resolve_piper(path: &Path) -> Result<PathBuf, CliError> {
    if path.components().count() > 1 || path.is_absolute() {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(CliError::EngineMissing(path.display().to_string()))
        };
    }

    which::which(path).map_err(|e| CliError::EngineMissing(format!("{}: {e}", path.display())))
}

/// Build the voice registry alone, for commands that never start piper.
pub fn registry(config: &BridgeConfig) -> Arc<FileVoiceRegistry> {
    let registry = FileVoiceRegistry::from_config(config);
    debug!(data_dirs = ?registry.data_dirs(), "Voice registry ready");
    Arc::new(registry)
}

/// Wire the bridge.
///
/// Fails when piper cannot be found. A default voice that does not resolve
/// is only a warning: clients may still ask for other voices.
pub async fn bootstrap(config: BridgeConfig) -> Result<Bridge, CliError> {
    let piper = resolve_piper(&config.piper_path)?;
    info!(piper = %piper.display(), mode = %config.engine_mode, "Using piper");

    let registry = registry(&config);
    match registry.resolve(&config.voice).await {
        Ok(voice) => info!(
            voice = %voice.id,
            sample_rate = voice.sample_rate,
            model = %voice.model_path.display(),
            "Default voice ready"
        ),
        Err(e) => warn!(voice = %config.voice, error = %e, "Default voice is not available"),
    }

    let backend = Arc::new(PiperBackend::new(piper));
    let dispatcher = SynthesisDispatcher::from_bridge(backend, &config, None);

    Ok(Bridge {
        config,
        registry,
        dispatcher,
    })
}
