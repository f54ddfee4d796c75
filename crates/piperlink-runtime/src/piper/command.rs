//! Piper command-line construction.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use piperlink_core::{EngineMode, EngineSpec};

/// Arguments for one Piper process.
///
/// Both modes take JSON lines on stdin (`--json-input`) so the speaker can
/// vary per job. One-shot mode streams raw PCM on stdout; persistent mode
/// writes a WAV file per job into `output_dir` and prints its path.
pub fn piper_args(spec: &EngineSpec, output_dir: Option<&Path>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--model".into(),
        spec.voice.model_path.clone().into_os_string(),
        "--config".into(),
        spec.voice.config_path.clone().into_os_string(),
        "--json-input".into(),
    ];

    match spec.params.mode {
        EngineMode::OneShot => args.push("--output-raw".into()),
        EngineMode::Persistent => {
            if let Some(dir) = output_dir {
                args.push("--output-dir".into());
                args.push(dir.as_os_str().to_owned());
            }
        }
    }

    for (flag, value) in [
        ("--length-scale", spec.params.length_scale),
        ("--noise-scale", spec.params.noise_scale),
        ("--noise-w", spec.params.noise_w),
    ] {
        if let Some(v) = value {
            args.push(flag.into());
            args.push(v.to_string().into());
        }
    }

    args
}

/// Build the command with all three stdio streams piped.
///
/// `kill_on_drop` guarantees a forgotten child never outlives its handle.
pub fn piper_command(piper: &Path, spec: &EngineSpec, output_dir: Option<&Path>) -> Command {
    let mut cmd = Command::new(piper);
    cmd.args(piper_args(spec, output_dir))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}
