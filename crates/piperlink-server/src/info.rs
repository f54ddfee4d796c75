//! The `info` answer to `describe`.

use piperlink_core::VoiceDescriptor;

use crate::protocol::{Attribution, Info, TtsProgram, TtsSpeaker, TtsVoice};

const PROGRAM_NAME: &str = "piper";
const PROGRAM_DESCRIPTION: &str = "Fast, local, neural text to speech";

fn attribution() -> Attribution {
    Attribution {
        name: "rhasspy".to_string(),
        url: "https://github.com/rhasspy/piper".to_string(),
    }
}

/// Describe the Piper program and its voices.
pub fn build_info(voices: &[VoiceDescriptor]) -> Info {
    let version = env!("CARGO_PKG_VERSION").to_string();

    let voices = voices
        .iter()
        .map(|voice| TtsVoice {
            name: voice.id.clone(),
            description: Some(voice.description.clone()),
            attribution: attribution(),
            installed: voice.installed,
            version: None,
            languages: voice.languages.clone(),
            speakers: (!voice.speakers.is_empty()).then(|| {
                voice
                    .speakers
                    .iter()
                    .map(|name| TtsSpeaker { name: name.clone() })
                    .collect()
            }),
        })
        .collect();

    Info {
        tts: vec![TtsProgram {
            name: PROGRAM_NAME.to_string(),
            description: Some(PROGRAM_DESCRIPTION.to_string()),
            attribution: attribution(),
            installed: true,
            version: Some(version),
            voices,
        }],
    }
}
