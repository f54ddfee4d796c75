//! Tests that run the `piperlink` binary.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn piperlink(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_piperlink"))
        .args(args)
        .current_dir(cwd)
        .env("PIPERLINK_DATA_DIRS", cwd)
        .env("PIPERLINK_DOWNLOAD_DIR", cwd)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn install_voice(dir: &Path, name: &str) {
    fs::write(dir.join(format!("{name}.onnx")), b"model").unwrap();
    fs::write(
        dir.join(format!("{name}.onnx.json")),
        r#"{"audio": {"sample_rate": 22050, "quality": "medium"}, "language": {"code": "en_GB"}}"#,
    )
    .unwrap();
}

#[test]
fn test_voices_json_lists_installed_voices() {
    let dir = TempDir::new().unwrap();
    install_voice(dir.path(), "en_GB-test-medium");
    let data_dir = dir.path().to_str().unwrap();

    let output = piperlink(dir.path(), &["voices", "--json", "--data-dir", data_dir]);
    assert!(output.status.success(), "{output:?}");

    let voices: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(voices[0]["id"], "en_GB-test-medium");
    assert_eq!(voices[0]["sample_rate"], 22_050);
    assert_eq!(voices[0]["installed"], true);
}

#[test]
fn test_missing_piper_exits_unavailable() {
    let dir = TempDir::new().unwrap();
    let piper = dir.path().join("no-such-piper");

    let output = piperlink(
        dir.path(),
        &["--piper", piper.to_str().unwrap(), "--uri", "tcp://127.0.0.1:0"],
    );
    assert_eq!(output.status.code(), Some(69));
}

#[test]
fn test_invalid_config_exits_config_error() {
    let dir = TempDir::new().unwrap();
    let output = piperlink(dir.path(), &["--max-piper-procs", "0"]);
    assert_eq!(output.status.code(), Some(78));

    let output = piperlink(dir.path(), &["--uri", "http://localhost:10200"]);
    assert_eq!(output.status.code(), Some(78));
}

#[test]
fn test_unknown_flag_is_usage_error() {
    let dir = TempDir::new().unwrap();
    let output = piperlink(dir.path(), &["--no-such-flag"]);
    assert_eq!(output.status.code(), Some(2));
}
