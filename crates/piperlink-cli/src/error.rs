//! CLI error types and their exit codes.

use thiserror::Error;

use piperlink_core::{ConfigError, RegistryError};
use piperlink_server::ServerError;

/// Startup failures. Everything after the listener is bound is handled
/// per session and never reaches here.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid bridge configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The piper executable could not be found.
    #[error("Piper not found: {0}")]
    EngineMissing(String),

    /// The listen address could not be bound.
    #[error("Listen error: {0}")]
    Listen(String),

    /// Voice lookup failed.
    #[error("Voice registry error: {0}")]
    Registry(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl CliError {
    /// Map error to an exit code.
    ///
    /// Exit codes follow sysexits.h:
    /// - 1: General error
    /// - 69: EX_UNAVAILABLE (engine binary missing)
    /// - 71: EX_OSERR (listen failure)
    /// - 78: EX_CONFIG (invalid configuration)
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 78,
            Self::EngineMissing(_) => 69,
            Self::Listen(_) => 71,
            Self::Registry(_) | Self::Io(_) => 1,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<ServerError> for CliError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Bind { .. } => Self::Listen(err.to_string()),
            ServerError::InvalidUri { .. } | ServerError::UnsupportedScheme(_) => {
                Self::Config(err.to_string())
            }
        }
    }
}

impl From<RegistryError> for CliError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
