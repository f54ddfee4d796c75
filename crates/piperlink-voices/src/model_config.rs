//! Piper model config (`<voice>.onnx.json`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use piperlink_core::RegistryError;

/// Sample rate Piper assumes when a config omits it.
const DEFAULT_SAMPLE_RATE: u32 = 22_050;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
struct AudioSection {
    #[serde(default)]
    sample_rate: Option<u32>,
    #[serde(default)]
    quality: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
struct LanguageSection {
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
struct EspeakSection {
    #[serde(default)]
    voice: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawModelConfig {
    #[serde(default)]
    audio: AudioSection,
    #[serde(default)]
    language: LanguageSection,
    #[serde(default)]
    espeak: EspeakSection,
    #[serde(default)]
    num_speakers: Option<u32>,
    #[serde(default)]
    speaker_id_map: BTreeMap<String, i64>,
    #[serde(default)]
    dataset: Option<String>,
}

/// The parts of a model config the bridge cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub sample_rate: u32,
    /// Language code, falling back to the espeak voice when absent.
    pub language: Option<String>,
    pub quality: Option<String>,
    pub num_speakers: u32,
    pub speaker_id_map: BTreeMap<String, i64>,
    pub dataset: Option<String>,
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content).map_err(|message| RegistryError::InvalidConfig {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let raw: RawModelConfig = serde_json::from_str(content).map_err(|e| e.to_string())?;

        let sample_rate = raw.audio.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
        if sample_rate == 0 {
            return Err("audio.sample_rate must be positive".to_string());
        }

        let num_speakers = raw
            .num_speakers
            .unwrap_or(0)
            .max(u32::try_from(raw.speaker_id_map.len()).unwrap_or(u32::MAX))
            .max(1);

        Ok(Self {
            sample_rate,
            language: raw.language.code.or(raw.espeak.voice),
            quality: raw.audio.quality,
            num_speakers,
            speaker_id_map: raw.speaker_id_map,
            dataset: raw.dataset,
        })
    }
}
