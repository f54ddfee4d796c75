//! [`VoiceRegistry`] backed by model files on disk.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, warn};

use piperlink_core::{
    BridgeConfig, RegistryError, ResolvedVoice, VoiceDescriptor, VoiceRegistry,
};

use crate::catalog::{CatalogVoice, VoiceCatalog};
use crate::locate::{find_voice, installed_voice_names, size_mismatch};
use crate::model_config::ModelConfig;

/// Voice registry reading Piper model pairs from data directories.
///
/// Model configs are parsed once per voice and cached until
/// [`refresh`](VoiceRegistry::refresh). Directory scans and config reads run
/// on the blocking thread pool.
pub struct FileVoiceRegistry {
    data_dirs: Vec<PathBuf>,
    download_dir: PathBuf,
    show_uninstalled: bool,
    catalog: RwLock<VoiceCatalog>,
    cache: RwLock<HashMap<String, ResolvedVoice>>,
}

impl FileVoiceRegistry {
    /// Create a registry and load the catalog from `download_dir`.
    ///
    /// A missing or unreadable catalog falls back to the embedded one.
    pub fn new(data_dirs: Vec<PathBuf>, download_dir: PathBuf, show_uninstalled: bool) -> Self {
        let catalog = load_catalog(&download_dir);
        Self {
            data_dirs,
            download_dir,
            show_uninstalled,
            catalog: RwLock::new(catalog),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.effective_data_dirs(),
            config.download_dir.clone(),
            config.show_uninstalled,
        )
    }

    pub fn data_dirs(&self) -> &[PathBuf] {
        &self.data_dirs
    }

    fn catalog(&self) -> VoiceCatalog {
        self.catalog
            .read()
            .map_or_else(|poisoned| poisoned.into_inner().clone(), |c| c.clone())
    }

    fn cached(&self, voice_id: &str) -> Option<ResolvedVoice> {
        self.cache
            .read()
            .ok()
            .and_then(|cache| cache.get(voice_id).cloned())
    }

    fn remember(&self, keys: &[&str], voice: &ResolvedVoice) {
        if let Ok(mut cache) = self.cache.write() {
            for key in keys {
                cache.insert((*key).to_string(), voice.clone());
            }
        }
    }
}

/// Run filesystem work off the async worker threads.
async fn blocking<T, F>(work: F) -> Result<T, RegistryError>
where
    F: FnOnce() -> Result<T, RegistryError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(io::Error::from)?
}

fn resolve_files(
    voice_id: &str,
    catalog: &VoiceCatalog,
    data_dirs: &[PathBuf],
) -> Result<ResolvedVoice, RegistryError> {
    let canonical = catalog.canonical(voice_id).to_string();
    if canonical != voice_id {
        debug!(alias = voice_id, voice = %canonical, "Resolved voice alias");
    }

    let files = find_voice(&canonical, data_dirs)
        .ok_or_else(|| RegistryError::NotFound(voice_id.to_string()))?;

    if let (Some(entry), Some(dir)) = (catalog.get(&canonical), files.dir()) {
        if let Some((path, expected, actual)) = size_mismatch(dir, entry.model_files()) {
            warn!(
                voice = %canonical,
                path = %path.display(),
                expected,
                actual,
                "Wrong size for voice file"
            );
            return Err(RegistryError::NotFound(format!(
                "{voice_id} (file size verification failed)"
            )));
        }
    }

    let config = ModelConfig::load(&files.config)?;
    Ok(ResolvedVoice {
        id: canonical,
        model_path: files.model,
        config_path: files.config,
        sample_rate: config.sample_rate,
        num_speakers: config.num_speakers,
        speaker_id_map: config.speaker_id_map,
    })
}

fn describe_installed(
    name: &str,
    catalog: &VoiceCatalog,
    data_dirs: &[PathBuf],
) -> Option<VoiceDescriptor> {
    let files = find_voice(name, data_dirs)?;
    let config = match ModelConfig::load(&files.config) {
        Ok(config) => config,
        Err(e) => {
            warn!(voice = name, error = %e, "Skipping voice with unreadable config");
            return None;
        }
    };

    let entry = catalog.get(name);
    let installed = match (entry, files.dir()) {
        (Some(entry), Some(dir)) => size_mismatch(dir, entry.model_files()).is_none(),
        _ => true,
    };

    let mut speakers: Vec<(&String, &i64)> = config.speaker_id_map.iter().collect();
    speakers.sort_by_key(|(_, id)| **id);

    Some(VoiceDescriptor {
        id: name.to_string(),
        description: entry.map_or_else(
            || config.dataset.clone().unwrap_or_else(|| name.to_string()),
            CatalogVoice::description,
        ),
        languages: config.language.clone().into_iter().collect(),
        sample_rate: Some(config.sample_rate),
        speakers: speakers.into_iter().map(|(n, _)| n.clone()).collect(),
        quality: config
            .quality
            .clone()
            .or_else(|| entry.and_then(|e| e.quality.clone())),
        installed,
    })
}

fn scan_voices(
    catalog: &VoiceCatalog,
    data_dirs: &[PathBuf],
    show_uninstalled: bool,
) -> Vec<VoiceDescriptor> {
    let mut voices: Vec<VoiceDescriptor> = installed_voice_names(data_dirs)
        .iter()
        .filter_map(|name| describe_installed(name, catalog, data_dirs))
        .collect();

    if show_uninstalled {
        let present: BTreeSet<String> = voices.iter().map(|v| v.id.clone()).collect();
        voices.extend(
            catalog
                .voices()
                .filter(|entry| !present.contains(&entry.key))
                .map(describe_uninstalled),
        );
        voices.sort_by(|a, b| a.id.cmp(&b.id));
    }

    voices
}

fn load_catalog(download_dir: &Path) -> VoiceCatalog {
    match VoiceCatalog::load(download_dir) {
        Ok(Some(catalog)) => {
            debug!(voices = catalog.len(), "Voice catalog loaded");
            return catalog;
        }
        Ok(None) => debug!(
            dir = %download_dir.display(),
            "No voice catalog in download directory; using embedded catalog"
        ),
        Err(e) => warn!(error = %e, "Failed to load voice catalog; using embedded catalog"),
    }

    VoiceCatalog::embedded().unwrap_or_else(|e| {
        warn!(error = %e, "Embedded voice catalog is invalid; continuing without one");
        VoiceCatalog::default()
    })
}

fn describe_uninstalled(entry: &CatalogVoice) -> VoiceDescriptor {
    VoiceDescriptor {
        id: entry.key.clone(),
        description: entry.description(),
        languages: vec![entry.language.code.clone()],
        sample_rate: None,
        speakers: entry.speaker_names(),
        quality: entry.quality.clone(),
        installed: false,
    }
}

#[async_trait]
impl VoiceRegistry for FileVoiceRegistry {
    async fn list_voices(&self) -> Result<Vec<VoiceDescriptor>, RegistryError> {
        let catalog = self.catalog();
        let data_dirs = self.data_dirs.clone();
        let show_uninstalled = self.show_uninstalled;
        blocking(move || Ok(scan_voices(&catalog, &data_dirs, show_uninstalled))).await
    }

    async fn resolve(&self, voice_id: &str) -> Result<ResolvedVoice, RegistryError> {
        let voice_id = voice_id.trim();
        if let Some(voice) = self.cached(voice_id) {
            return Ok(voice);
        }

        let catalog = self.catalog();
        let data_dirs = self.data_dirs.clone();
        let lookup = voice_id.to_string();
        let voice = blocking(move || resolve_files(&lookup, &catalog, &data_dirs)).await?;
        debug!(
            voice = %voice.id,
            model = %voice.model_path.display(),
            sample_rate = voice.sample_rate,
            "Resolved voice"
        );
        self.remember(&[voice_id, voice.id.as_str()], &voice);
        Ok(voice)
    }

    async fn refresh(&self) -> Result<(), RegistryError> {
        let download_dir = self.download_dir.clone();
        let catalog = blocking(move || Ok(load_catalog(&download_dir))).await?;
        debug!(voices = catalog.len(), "Voice registry refreshed");
        if let Ok(mut current) = self.catalog.write() {
            *current = catalog;
        }
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
        Ok(())
    }
}
