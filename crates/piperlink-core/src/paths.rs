//! Default locations for voice data.
//!
//! Resolution never creates directories; the bridge only reads voice files.

use std::env;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Environment variable overriding the data root.
pub const DATA_DIR_ENV: &str = "PIPERLINK_DATA_DIR";

/// Errors that can occur during path resolution.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// Could not determine the user's home directory.
    #[error("Cannot determine home directory")]
    NoHomeDir,

    /// Could not determine the system data directory.
    #[error("Cannot determine system data directory")]
    NoDataDir,

    /// An empty path was provided.
    #[error("Path cannot be empty")]
    EmptyPath,
}

/// Root directory for piperlink data.
///
/// Resolution order:
/// 1. `PIPERLINK_DATA_DIR` environment variable
/// 2. System data directory (e.g. `~/.local/share/piperlink`)
pub fn data_root() -> Result<PathBuf, PathError> {
    if let Ok(path) = env::var(DATA_DIR_ENV) {
        if !path.trim().is_empty() {
            return normalize_user_path(&path);
        }
    }

    dirs::data_dir()
        .map(|dir| dir.join("piperlink"))
        .ok_or(PathError::NoDataDir)
}

/// Directory where the voice catalog and downloaded voices live.
pub fn default_download_dir() -> Result<PathBuf, PathError> {
    Ok(data_root()?.join("voices"))
}

/// Expand a leading `~` and make the path absolute against the current
/// directory.
pub fn normalize_user_path(raw: &str) -> Result<PathBuf, PathError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PathError::EmptyPath);
    }

    let expanded = if trimmed == "~" {
        dirs::home_dir().ok_or(PathError::NoHomeDir)?
    } else if let Some(rest) = trimmed.strip_prefix("~/") {
        dirs::home_dir().ok_or(PathError::NoHomeDir)?.join(rest)
    } else {
        PathBuf::from(trimmed)
    };

    Ok(absolutize(&expanded))
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
}
