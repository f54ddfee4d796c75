//! Voices command handler.
//!
//! Prints the voices the bridge would announce in `info`.

use std::io::Write;

use piperlink_core::{VoiceDescriptor, VoiceRegistry};

use crate::error::CliError;

/// Execute the voices command.
pub async fn execute(registry: &dyn VoiceRegistry, json: bool) -> Result<(), CliError> {
    let voices = registry.list_voices().await?;
    let mut out = std::io::stdout().lock();

    if json {
        let rendered =
            serde_json::to_string_pretty(&voices).map_err(|e| CliError::Io(e.to_string()))?;
        writeln!(out, "{rendered}")?;
        return Ok(());
    }

    if voices.is_empty() {
        writeln!(out, "No voices found.")?;
        writeln!(
            out,
            "Place <voice>.onnx and <voice>.onnx.json in a data directory (--data-dir)."
        )?;
        return Ok(());
    }

    write_table(&mut out, &voices)?;
    Ok(())
}

fn write_table(out: &mut impl Write, voices: &[VoiceDescriptor]) -> std::io::Result<()> {
    writeln!(
        out,
        "{:<32} {:<10} {:<8} {:<9} Speakers",
        "Voice", "Language", "Quality", "Installed"
    )?;
    writeln!(out, "{}", "-".repeat(72))?;

    for voice in voices {
        let language = voice.languages.first().map_or("--", String::as_str);
        let quality = voice.quality.as_deref().unwrap_or("--");
        let installed = if voice.installed { "yes" } else { "no" };
        writeln!(
            out,
            "{:<32} {:<10} {:<8} {:<9} {}",
            voice.id,
            language,
            quality,
            installed,
            voice.speakers.len()
        )?;
    }
    Ok(())
}
