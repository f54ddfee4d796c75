//! The `voices.json` voice catalog.
//!
//! Same schema as the upstream Piper catalog: a map from voice key to
//! metadata, listing every file that belongs to the voice with its expected
//! size.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use piperlink_core::RegistryError;

/// File name of the catalog inside the download directory.
pub const CATALOG_FILE_NAME: &str = "voices.json";

/// Fallback catalog used when the download directory has none.
const EMBEDDED_CATALOG: &str = include_str!("../voices.json");

/// Files listed in the catalog that are never part of a model.
const SKIP_FILES: &[&str] = &["MODEL_CARD"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CatalogLanguage {
    pub code: String,
    #[serde(default)]
    pub name_english: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogFile {
    pub size_bytes: u64,
    #[serde(default)]
    pub md5_digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogVoice {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub language: CatalogLanguage,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub num_speakers: u32,
    #[serde(default)]
    pub speaker_id_map: BTreeMap<String, i64>,
    #[serde(default)]
    pub files: BTreeMap<String, CatalogFile>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl CatalogVoice {
    /// Model files (by bare file name) with their expected sizes.
    pub fn model_files(&self) -> impl Iterator<Item = (&str, u64)> {
        self.files.iter().filter_map(|(path, info)| {
            let name = Path::new(path).file_name()?.to_str()?;
            (!SKIP_FILES.contains(&name)).then_some((name, info.size_bytes))
        })
    }

    /// Human-readable description for voice listings.
    pub fn description(&self) -> String {
        let language = self
            .language
            .name_english
            .as_deref()
            .unwrap_or(&self.language.code);
        match self.quality.as_deref() {
            Some(q) => format!("{} ({language}, {q})", self.name),
            None => format!("{} ({language})", self.name),
        }
    }

    /// Speaker names ordered by speaker id.
    pub fn speaker_names(&self) -> Vec<String> {
        let mut speakers: Vec<_> = self.speaker_id_map.iter().collect();
        speakers.sort_by_key(|(_, id)| **id);
        speakers.into_iter().map(|(n, _)| n.clone()).collect()
    }
}

/// Parsed catalog with alias lookup.
#[derive(Debug, Clone, Default)]
pub struct VoiceCatalog {
    voices: BTreeMap<String, CatalogVoice>,
    aliases: HashMap<String, String>,
}

impl VoiceCatalog {
    /// Load the catalog from `download_dir`. `Ok(None)` when there is no
    /// catalog file.
    pub fn load(download_dir: &Path) -> Result<Option<Self>, RegistryError> {
        let path = download_dir.join(CATALOG_FILE_NAME);
        match fs::read_to_string(&path) {
            Ok(content) => {
                debug!(path = %path.display(), "Loading voice catalog");
                Self::parse(&content, &path).map(Some)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RegistryError::Io(e)),
        }
    }

    /// The catalog compiled into the binary.
    pub fn embedded() -> Result<Self, RegistryError> {
        Self::parse(EMBEDDED_CATALOG, Path::new("<embedded voices.json>"))
    }

    /// Parse catalog JSON. `origin` is used in error messages only.
    pub fn parse(content: &str, origin: &Path) -> Result<Self, RegistryError> {
        let voices: BTreeMap<String, CatalogVoice> =
            serde_json::from_str(content).map_err(|e| RegistryError::InvalidCatalog {
                path: PathBuf::from(origin),
                message: e.to_string(),
            })?;

        let aliases = voices
            .iter()
            .flat_map(|(key, voice)| voice.aliases.iter().map(move |a| (a.clone(), key.clone())))
            .collect();

        Ok(Self { voices, aliases })
    }

    /// Map an alias to its canonical key. Unknown names map to themselves.
    pub fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map_or(name, String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&CatalogVoice> {
        self.voices.get(key)
    }

    pub fn voices(&self) -> impl Iterator<Item = &CatalogVoice> {
        self.voices.values()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "en_GB-alan-low": {
            "key": "en_GB-alan-low",
            "name": "alan",
            "language": {"code": "en_GB", "name_english": "English"},
            "quality": "low",
            "num_speakers": 1,
            "speaker_id_map": {},
            "files": {
                "en/en_GB/alan/low/en_GB-alan-low.onnx": {"size_bytes": 10, "md5_digest": "x"},
                "en/en_GB/alan/low/en_GB-alan-low.onnx.json": {"size_bytes": 5, "md5_digest": "y"},
                "en/en_GB/alan/low/MODEL_CARD": {"size_bytes": 3, "md5_digest": "z"}
            },
            "aliases": ["en-gb-alan-low"]
        }
    }"#;

    fn sample() -> VoiceCatalog {
        VoiceCatalog::parse(SAMPLE, Path::new("voices.json")).unwrap()
    }

    #[test]
    fn test_alias_resolution() {
        let catalog = sample();
        assert_eq!(catalog.canonical("en-gb-alan-low"), "en_GB-alan-low");
        assert_eq!(catalog.canonical("other"), "other");
    }

    #[test]
    fn test_model_files_skip_model_card() {
        let catalog = sample();
        let voice = catalog.get("en_GB-alan-low").unwrap();
        let files: Vec<_> = voice.model_files().collect();
        assert_eq!(
            files,
            vec![("en_GB-alan-low.onnx", 10), ("en_GB-alan-low.onnx.json", 5)]
        );
    }

    #[test]
    fn test_description() {
        let catalog = sample();
        let voice = catalog.get("en_GB-alan-low").unwrap();
        assert_eq!(voice.description(), "alan (English, low)");
    }

    #[test]
    fn test_invalid_catalog() {
        let err = VoiceCatalog::parse("[1, 2]", Path::new("/x/voices.json")).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidCatalog { .. }));
    }

    #[test]
    fn test_missing_catalog_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(VoiceCatalog::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_embedded_catalog_parses() {
        let catalog = VoiceCatalog::embedded().unwrap();
        assert!(!catalog.is_empty());
        assert_eq!(catalog.canonical("en-us-lessac-medium"), "en_US-lessac-medium");
        let lessac = catalog.get("en_US-lessac-medium").unwrap();
        assert_eq!(lessac.description(), "lessac (English, medium)");
        assert_eq!(lessac.model_files().count(), 0);
    }
}
