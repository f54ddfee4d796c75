//! Serve command handler.
//!
//! Binds the listener, serves sessions until SIGINT or SIGTERM, then stops
//! every piper process. SIGHUP reloads the voice catalog and model configs.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use piperlink_core::VoiceRegistry;
use piperlink_server::{serve, ListenUri, Listener};

use crate::bootstrap::Bridge;
use crate::error::CliError;

/// Execute the serve command.
///
/// Returns once the listener has stopped and the pool is shut down.
pub async fn execute(bridge: Bridge) -> Result<(), CliError> {
    let uri: ListenUri = bridge.config.uri.parse()?;
    let listener = Listener::bind(&uri).await?;
    info!(
        %uri,
        pool_size = bridge.config.pool_size,
        voice = %bridge.config.voice,
        "piperlink ready"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));
    let reloader = tokio::spawn(reload_on_hangup(Arc::clone(&bridge.registry)));

    serve(listener, bridge.session_context(), shutdown).await;
    reloader.abort();

    bridge.dispatcher.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Drop cached voice metadata so new requests see the files on disk.
pub async fn reload_voices(registry: &dyn VoiceRegistry) {
    match registry.refresh().await {
        Ok(()) => info!("Voice registry reloaded"),
        Err(e) => warn!(error = %e, "Voice registry reload failed"),
    }
}

#[cfg(unix)]
async fn reload_on_hangup(registry: Arc<dyn VoiceRegistry>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGHUP; voices will not be reloaded");
            return;
        }
    };
    while hangup.recv().await.is_some() {
        info!("SIGHUP received");
        reload_voices(registry.as_ref()).await;
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_registry: Arc<dyn VoiceRegistry>) {}

async fn cancel_on_signal(shutdown: CancellationToken) {
    wait_for_signal().await;
    info!("Shutdown signal received");
    shutdown.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM; only Ctrl+C will stop the server");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Cannot listen for Ctrl+C");
                term.recv().await;
            }
        }
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use piperlink_voices::{FileVoiceRegistry, CATALOG_FILE_NAME};

    use super::*;

    #[tokio::test]
    async fn test_reload_picks_up_new_catalog_alias() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("en_GB-new-low.onnx"), b"model").unwrap();
        fs::write(
            dir.path().join("en_GB-new-low.onnx.json"),
            r#"{"audio": {"sample_rate": 16000}}"#,
        )
        .unwrap();
        let registry =
            FileVoiceRegistry::new(vec![dir.path().to_path_buf()], dir.path().to_path_buf(), false);
        assert!(registry.resolve("new").await.is_err());

        fs::write(
            dir.path().join(CATALOG_FILE_NAME),
            r#"{"en_GB-new-low": {"key": "en_GB-new-low", "aliases": ["new"]}}"#,
        )
        .unwrap();
        reload_voices(&registry).await;

        assert_eq!(registry.resolve("new").await.unwrap().id, "en_GB-new-low");
    }
}
