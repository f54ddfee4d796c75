//! Voice metadata supplied by the voice registry.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One installed (or installable) voice, as announced to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceDescriptor {
    /// Voice identifier, e.g. `en_GB-alan-medium`.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Language codes spoken by the voice (e.g. `en_GB`).
    pub languages: Vec<String>,
    /// Output sample rate, when known.
    pub sample_rate: Option<u32>,
    /// Named speakers for multi-speaker voices, ordered by speaker id.
    pub speakers: Vec<String>,
    /// Quality tier (`x_low`, `low`, `medium`, `high`), when known.
    pub quality: Option<String>,
    /// Whether the model files are present on disk.
    pub installed: bool,
}

/// Model reference for a voice that passed registry resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedVoice {
    /// Canonical voice identifier (aliases already resolved).
    pub id: String,
    /// Path to the `.onnx` model.
    pub model_path: PathBuf,
    /// Path to the `.onnx.json` model config.
    pub config_path: PathBuf,
    /// Output sample rate from the model config.
    pub sample_rate: u32,
    /// Number of speakers in the model (1 for single-speaker voices).
    pub num_speakers: u32,
    /// Speaker name to speaker id.
    pub speaker_id_map: BTreeMap<String, i64>,
}

impl ResolvedVoice {
    /// Resolve a speaker selection to a numeric speaker id.
    ///
    /// Names are looked up in the speaker map first; otherwise a numeric
    /// selection is accepted when it is within the model's speaker count.
    #[must_use]
    pub fn speaker_id(&self, speaker: &str) -> Option<i64> {
        let speaker = speaker.trim();
        if let Some(id) = self.speaker_id_map.get(speaker) {
            return Some(*id);
        }

        let id: i64 = speaker.parse().ok()?;
        (0..i64::from(self.num_speakers.max(1))).contains(&id).then_some(id)
    }

    /// Whether the model has more than one speaker.
    #[must_use]
    pub const fn is_multi_speaker(&self) -> bool {
        self.num_speakers > 1
    }

    /// Speaker names ordered by speaker id.
    #[must_use]
    pub fn speaker_names(&self) -> Vec<String> {
        let mut speakers: Vec<(&String, &i64)> = self.speaker_id_map.iter().collect();
        speakers.sort_by_key(|(_, id)| **id);
        speakers.into_iter().map(|(name, _)| name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(num_speakers: u32, speakers: &[(&str, i64)]) -> ResolvedVoice {
        ResolvedVoice {
            id: "en_US-test-medium".to_string(),
            model_path: PathBuf::from("/voices/en_US-test-medium.onnx"),
            config_path: PathBuf::from("/voices/en_US-test-medium.onnx.json"),
            sample_rate: 22_050,
            num_speakers,
            speaker_id_map: speakers
                .iter()
                .map(|(name, id)| ((*name).to_string(), *id))
                .collect(),
        }
    }

    #[test]
    fn test_speaker_by_name() {
        let v = voice(2, &[("p225", 0), ("p226", 1)]);
        assert_eq!(v.speaker_id("p226"), Some(1));
        assert_eq!(v.speaker_id(" p225 "), Some(0));
    }

    #[test]
    fn test_speaker_by_number() {
        let v = voice(3, &[]);
        assert_eq!(v.speaker_id("2"), Some(2));
        assert_eq!(v.speaker_id("3"), None);
        assert_eq!(v.speaker_id("-1"), None);
    }

    #[test]
    fn test_unknown_speaker_name() {
        let v = voice(2, &[("p225", 0)]);
        assert_eq!(v.speaker_id("nobody"), None);
    }

    #[test]
    fn test_speaker_names_sorted_by_id() {
        let v = voice(3, &[("zed", 0), ("amy", 2), ("bob", 1)]);
        assert_eq!(v.speaker_names(), vec!["zed", "bob", "amy"]);
    }
}
