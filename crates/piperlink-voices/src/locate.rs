//! Locating voice model files on disk.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

const MODEL_EXT: &str = ".onnx";
const CONFIG_SUFFIX: &str = ".onnx.json";

/// Model and config file of one voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceFiles {
    pub model: PathBuf,
    pub config: PathBuf,
}

impl VoiceFiles {
    /// Directory holding the model, if any.
    pub fn dir(&self) -> Option<&Path> {
        self.model.parent()
    }
}

/// Find `<name>.onnx` and `<name>.onnx.json` in the first data directory
/// containing both; otherwise treat `name` as a path to a custom model with
/// its config at `<name>.json`.
pub fn find_voice(name: &str, data_dirs: &[PathBuf]) -> Option<VoiceFiles> {
    if name.trim().is_empty() {
        return None;
    }

    // Bare names only; anything with a separator goes straight to the
    // custom-path check.
    if !name.contains(['/', '\\']) {
        for dir in data_dirs {
            let model = dir.join(format!("{name}{MODEL_EXT}"));
            let config = dir.join(format!("{name}{CONFIG_SUFFIX}"));
            if model.is_file() && config.is_file() {
                return Some(VoiceFiles { model, config });
            }
        }
    }

    let model = PathBuf::from(name);
    let config = PathBuf::from(format!("{name}.json"));
    (model.is_file() && config.is_file()).then_some(VoiceFiles { model, config })
}

/// Names of every complete model pair across `data_dirs`, deduplicated and
/// sorted. Unreadable directories are skipped with a warning.
pub fn installed_voice_names(data_dirs: &[PathBuf]) -> Vec<String> {
    let mut names = BTreeSet::new();

    for dir in data_dirs {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                if dir.exists() {
                    warn!(dir = %dir.display(), error = %e, "Cannot read voice directory");
                }
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(stem) = file_name.strip_suffix(MODEL_EXT) else {
                continue;
            };
            if stem.is_empty() || !path.is_file() {
                continue;
            }
            if dir.join(format!("{stem}{CONFIG_SUFFIX}")).is_file() {
                names.insert(stem.to_string());
            }
        }
    }

    names.into_iter().collect()
}

/// Compare on-disk sizes against expected sizes. Returns the first mismatch
/// as `(file, expected, actual)`; missing files count as size 0.
pub fn size_mismatch<'a>(
    dir: &Path,
    expected: impl IntoIterator<Item = (&'a str, u64)>,
) -> Option<(PathBuf, u64, u64)> {
    expected.into_iter().find_map(|(file_name, size)| {
        let path = dir.join(file_name);
        let actual = fs::metadata(&path).map_or(0, |m| m.len());
        (actual != size).then_some((path, size, actual))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path, bytes: usize) {
        fs::write(path, vec![b'x'; bytes]).unwrap();
    }

    #[test]
    fn test_find_in_first_matching_dir() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        touch(&a.path().join("v.onnx"), 1);
        touch(&b.path().join("v.onnx"), 1);
        touch(&b.path().join("v.onnx.json"), 1);

        let dirs = vec![a.path().to_path_buf(), b.path().to_path_buf()];
        let found = find_voice("v", &dirs).unwrap();
        assert_eq!(found.model, b.path().join("v.onnx"));
        assert_eq!(found.dir(), Some(b.path()));
    }

    #[test]
    fn test_find_custom_path() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("custom.onnx");
        touch(&model, 1);
        touch(&dir.path().join("custom.onnx.json"), 1);

        let found = find_voice(model.to_str().unwrap(), &[]).unwrap();
        assert_eq!(found.config, dir.path().join("custom.onnx.json"));
    }

    #[test]
    fn test_find_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_voice("nope", &[dir.path().to_path_buf()]).is_none());
        assert!(find_voice("", &[dir.path().to_path_buf()]).is_none());
    }

    #[test]
    fn test_installed_names_require_both_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.onnx"), 1);
        touch(&dir.path().join("a.onnx.json"), 1);
        touch(&dir.path().join("b.onnx"), 1);
        touch(&dir.path().join("readme.txt"), 1);

        let names = installed_voice_names(&[dir.path().to_path_buf(), PathBuf::from("/nonexistent")]);
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn test_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("m.onnx"), 4);

        assert!(size_mismatch(dir.path(), [("m.onnx", 4)]).is_none());
        let (path, expected, actual) = size_mismatch(dir.path(), [("m.onnx", 5)]).unwrap();
        assert_eq!(path, dir.path().join("m.onnx"));
        assert_eq!((expected, actual), (5, 4));
    }
}
