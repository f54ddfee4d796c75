//! Drives `PiperBackend` against shell scripts standing in for Piper.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use piperlink_core::{
    EngineBackend, EngineError, EngineJob, EngineMode, EngineParams, EngineRead, EngineSpec,
    PreparedRequest, ResolvedVoice, SynthesizeRequest,
};
use piperlink_runtime::{
    DispatcherConfig, EnginePool, PiperBackend, PoolConfig, SynthesisDispatcher,
};

const GRACE: Duration = Duration::from_millis(200);

/// Records its arguments, then emits `abcdefgh` for the single job on stdin.
const ONE_SHOT_SCRIPT: &str = r#"#!/bin/sh
echo "$@" > "$(dirname "$0")/args.txt"
echo "fake piper ready" >&2
read -r line
printf '%s' "$line" > "$(dirname "$0")/job.txt"
printf 'abcdefgh'
exit 0
"#;

const FAILING_SCRIPT: &str = r#"#!/bin/sh
read -r line
printf 'ab'
echo "model exploded" >&2
exit 3
"#;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("piper");
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Persistent fake: copies a fixed WAV to every requested output file.
fn persistent_script(dir: &Path, wav: &Path) -> PathBuf {
    let body = format!(
        r#"#!/bin/sh
echo "$@" > "$(dirname "$0")/args.txt"
while read -r line; do
  out=$(printf '%s' "$line" | sed 's/.*"output_file":"\([^"]*\)".*/\1/')
  cp "{wav}" "$out"
  echo "$out"
done
"#,
        wav = wav.display()
    );
    write_script(dir, &body)
}

fn write_wav(path: &Path, rate: u32, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for sample in samples {
        writer.write_sample(*sample).unwrap();
    }
    writer.finalize().unwrap();
}

fn spec(dir: &Path, mode: EngineMode) -> EngineSpec {
    EngineSpec::new(
        ResolvedVoice {
            id: "en_GB-test-medium".to_string(),
            model_path: dir.join("en_GB-test-medium.onnx"),
            config_path: dir.join("en_GB-test-medium.onnx.json"),
            sample_rate: 16_000,
            num_speakers: 1,
            speaker_id_map: BTreeMap::new(),
        },
        EngineParams {
            mode,
            length_scale: Some(1.5),
            ..EngineParams::default()
        },
    )
}

fn job(text: &str) -> EngineJob {
    EngineJob {
        text: text.to_string(),
        speaker_id: None,
    }
}

async fn read_all(
    process: &mut dyn piperlink_core::EngineProcess,
) -> Result<Vec<u8>, EngineError> {
    let mut audio = Vec::new();
    loop {
        match process.read(4096).await? {
            EngineRead::Audio(bytes) => audio.extend(bytes),
            EngineRead::End => return Ok(audio),
        }
    }
}

#[tokio::test]
async fn test_one_shot_streams_stdout_until_exit() {
    let dir = TempDir::new().unwrap();
    let piper = write_script(dir.path(), ONE_SHOT_SCRIPT);
    let backend = PiperBackend::new(&piper);

    let mut process = backend.spawn(&spec(dir.path(), EngineMode::OneShot)).await.unwrap();
    assert!(process.pid().is_some());
    assert!(process.is_alive());

    process
        .write(&EngineJob {
            text: "Hello.".to_string(),
            speaker_id: Some(2),
        })
        .await
        .unwrap();
    let audio = read_all(process.as_mut()).await.unwrap();
    assert_eq!(audio, b"abcdefgh");
    assert!(!process.is_alive());
    process.terminate(GRACE).await;

    let args = fs::read_to_string(dir.path().join("args.txt")).unwrap();
    assert!(args.contains("--json-input"));
    assert!(args.contains("--output-raw"));
    assert!(args.contains("--length-scale 1.5"));

    let job: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("job.txt")).unwrap()).unwrap();
    assert_eq!(job["text"], "Hello.");
    assert_eq!(job["speaker_id"], 2);
}

#[tokio::test]
async fn test_one_shot_nonzero_exit_is_an_error() {
    let dir = TempDir::new().unwrap();
    let piper = write_script(dir.path(), FAILING_SCRIPT);
    let backend = PiperBackend::new(&piper);

    let mut process = backend.spawn(&spec(dir.path(), EngineMode::OneShot)).await.unwrap();
    process.write(&job("Boom.")).await.unwrap();

    let err = read_all(process.as_mut()).await.unwrap_err();
    assert!(matches!(err, EngineError::Exited(_)), "{err:?}");
    process.terminate(GRACE).await;
}

#[tokio::test]
async fn test_missing_binary_is_a_spawn_failure() {
    let dir = TempDir::new().unwrap();
    let backend = PiperBackend::new(dir.path().join("no-such-piper"));

    let err = backend
        .spawn(&spec(dir.path(), EngineMode::OneShot))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, EngineError::BinaryNotFound(_)), "{err:?}");
    assert!(err.is_spawn_failure());
}

#[tokio::test]
async fn test_persistent_process_serves_several_jobs() {
    let dir = TempDir::new().unwrap();
    let wav = dir.path().join("fixture.wav");
    let samples: Vec<i16> = (0..300).map(|i| i16::try_from(i * 7).unwrap()).collect();
    write_wav(&wav, 16_000, &samples);
    let piper = persistent_script(dir.path(), &wav);
    let backend = PiperBackend::new(&piper);

    let mut process = backend
        .spawn(&spec(dir.path(), EngineMode::Persistent))
        .await
        .unwrap();

    let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    for text in ["First.", "Second."] {
        process.write(&job(text)).await.unwrap();
        assert!(!process.is_alive(), "busy process must not look idle");
        let audio = read_all(process.as_mut()).await.unwrap();
        assert_eq!(audio, expected);
        assert!(process.is_alive());
    }

    let args = fs::read_to_string(dir.path().join("args.txt")).unwrap();
    assert!(args.contains("--output-dir"));
    assert!(!args.contains("--output-raw"));

    process.terminate(GRACE).await;
}

#[tokio::test]
async fn test_dispatcher_over_one_shot_piper() {
    let dir = TempDir::new().unwrap();
    let piper = write_script(dir.path(), ONE_SHOT_SCRIPT);
    let pool = EnginePool::new(
        std::sync::Arc::new(PiperBackend::new(&piper)),
        PoolConfig {
            size: 1,
            terminate_grace: GRACE,
            reclaim_timeout: Duration::from_secs(2),
        },
    );
    let dispatcher = SynthesisDispatcher::new(
        pool,
        DispatcherConfig {
            samples_per_chunk: 2,
            ..DispatcherConfig::default()
        },
    );

    let voice = spec(dir.path(), EngineMode::OneShot).voice;
    for text in ["One.", "Two."] {
        let request =
            PreparedRequest::prepare(SynthesizeRequest::new(text, voice.id.clone()), voice.clone())
                .unwrap();
        let chunks: Vec<_> = dispatcher
            .synthesize(request, CancellationToken::new())
            .map(Result::unwrap)
            .collect()
            .await;

        let payloads: Vec<&[u8]> = chunks.iter().map(|c| c.payload.as_slice()).collect();
        assert_eq!(payloads, vec![&b"abcd"[..], &b"efgh"[..]]);
        assert!(chunks[1].is_last);
    }

    dispatcher.shutdown().await;
}
