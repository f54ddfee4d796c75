//! Test doubles for the engine and registry ports.
//!
//! Available to this crate's unit tests and, through the `test-utils`
//! feature, to other crates' tests.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use piperlink_core::{
    AudioFormat, EngineBackend, EngineError, EngineJob, EngineProcess, EngineRead, EngineSpec,
    RegistryError, RequestId, ResolvedVoice, VoiceDescriptor, VoiceRegistry,
};

use crate::pool::{PoolObserver, WorkerId};

/// Build a resolved voice with fake paths.
pub fn test_voice(id: &str, sample_rate: u32) -> ResolvedVoice {
    ResolvedVoice {
        id: id.to_string(),
        model_path: PathBuf::from(format!("/voices/{id}.onnx")),
        config_path: PathBuf::from(format!("/voices/{id}.onnx.json")),
        sample_rate,
        num_speakers: 1,
        speaker_id_map: BTreeMap::new(),
    }
}

/// How scripted processes behave when given a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedBehavior {
    /// Produce `bytes_per_char` bytes of audio per character, then end.
    Speak,
    /// Produce one chunk, then fail as if the process died.
    CrashMidStream,
    /// Never produce anything.
    Hang,
    /// Produce one chunk, then never produce anything again.
    HangAfterFirstChunk,
}

/// Counters shared by a backend and all its processes.
#[derive(Debug, Default)]
pub struct ScriptedStats {
    pub spawned: AtomicUsize,
    pub terminated: AtomicUsize,
    pub jobs: AtomicUsize,
}

impl ScriptedStats {
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> usize {
        self.jobs.load(Ordering::SeqCst)
    }

    /// Spawned processes not yet terminated.
    pub fn live(&self) -> usize {
        self.spawned().saturating_sub(self.terminated())
    }
}

/// Engine backend whose processes follow a script instead of running Piper.
pub struct ScriptedBackend {
    behavior: Mutex<ScriptedBehavior>,
    bytes_per_char: usize,
    chunk_bytes: usize,
    delay: Duration,
    terminate_delay: Duration,
    reusable: bool,
    spawn_failures: AtomicUsize,
    stats: Arc<ScriptedStats>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            behavior: Mutex::new(ScriptedBehavior::Speak),
            bytes_per_char: 100,
            chunk_bytes: 512,
            delay: Duration::from_millis(1),
            terminate_delay: Duration::ZERO,
            reusable: true,
            spawn_failures: AtomicUsize::new(0),
            stats: Arc::new(ScriptedStats::default()),
        }
    }

    #[must_use]
    pub fn with_behavior(self, behavior: ScriptedBehavior) -> Self {
        self.set_behavior(behavior);
        self
    }

    /// Delay before every read.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Time `terminate` takes, like a process sitting out its grace period.
    #[must_use]
    pub const fn with_terminate_delay(mut self, delay: Duration) -> Self {
        self.terminate_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_bytes_per_char(mut self, bytes: usize) -> Self {
        self.bytes_per_char = bytes;
        self
    }

    #[must_use]
    pub const fn with_chunk_bytes(mut self, bytes: usize) -> Self {
        self.chunk_bytes = bytes;
        self
    }

    /// Processes exit after their first job, like one-shot Piper.
    #[must_use]
    pub const fn single_use(mut self) -> Self {
        self.reusable = false;
        self
    }

    /// Fail the next `n` spawns.
    #[must_use]
    pub fn with_spawn_failures(self, n: usize) -> Self {
        self.spawn_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Change the behavior of processes spawned from now on.
    pub fn set_behavior(&self, behavior: ScriptedBehavior) {
        *self.behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    pub fn stats(&self) -> Arc<ScriptedStats> {
        Arc::clone(&self.stats)
    }

    /// Audio bytes a `Speak` process produces for `text`.
    pub fn expected_bytes(&self, text: &str) -> usize {
        text.chars().count() * self.bytes_per_char
    }
}

#[async_trait]
impl EngineBackend for ScriptedBackend {
    async fn spawn(&self, spec: &EngineSpec) -> Result<Box<dyn EngineProcess>, EngineError> {
        let failed = self
            .spawn_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(EngineError::SpawnFailed("scripted spawn failure".to_string()));
        }

        self.stats.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedProcess {
            behavior: *self.behavior.lock().unwrap_or_else(PoisonError::into_inner),
            format: spec.format(),
            bytes_per_char: self.bytes_per_char,
            chunk_bytes: self.chunk_bytes,
            delay: self.delay,
            terminate_delay: self.terminate_delay,
            reusable: self.reusable,
            remaining: None,
            sent_chunks: 0,
            dead: false,
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct ScriptedProcess {
    behavior: ScriptedBehavior,
    format: AudioFormat,
    bytes_per_char: usize,
    chunk_bytes: usize,
    delay: Duration,
    terminate_delay: Duration,
    reusable: bool,
    remaining: Option<usize>,
    sent_chunks: usize,
    dead: bool,
    stats: Arc<ScriptedStats>,
}

#[async_trait]
impl EngineProcess for ScriptedProcess {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    async fn write(&mut self, job: &EngineJob) -> Result<(), EngineError> {
        if self.dead {
            return Err(EngineError::Terminated);
        }
        if self.remaining.is_some() {
            return Err(EngineError::Protocol("job already in progress".to_string()));
        }
        self.stats.jobs.fetch_add(1, Ordering::SeqCst);
        self.remaining = Some(job.text.chars().count() * self.bytes_per_char);
        self.sent_chunks = 0;
        Ok(())
    }

    async fn read(&mut self, max: usize) -> Result<EngineRead, EngineError> {
        tokio::time::sleep(self.delay).await;

        let Some(remaining) = self.remaining else {
            return Err(EngineError::Protocol("no job in progress".to_string()));
        };

        let stalled = match self.behavior {
            ScriptedBehavior::Hang => true,
            ScriptedBehavior::HangAfterFirstChunk => self.sent_chunks > 0,
            ScriptedBehavior::Speak | ScriptedBehavior::CrashMidStream => false,
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        if self.behavior == ScriptedBehavior::CrashMidStream && self.sent_chunks > 0 {
            self.dead = true;
            self.remaining = None;
            return Err(EngineError::Exited("scripted crash".to_string()));
        }

        if remaining == 0 {
            self.remaining = None;
            if !self.reusable {
                self.dead = true;
            }
            return Ok(EngineRead::End);
        }

        let n = remaining.min(self.chunk_bytes).min(max.max(1));
        self.remaining = Some(remaining - n);
        self.sent_chunks += 1;
        // Deterministic ramp so tests can check ordering
        let offset = self.sent_chunks;
        Ok(EngineRead::Audio(
            (0..n).map(|i| u8::try_from((i + offset) % 251).unwrap_or(0)).collect(),
        ))
    }

    fn is_alive(&mut self) -> bool {
        !self.dead && self.remaining.is_none()
    }

    async fn terminate(self: Box<Self>, _grace: Duration) {
        tokio::time::sleep(self.terminate_delay).await;
        self.stats.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory voice registry.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    voices: HashMap<String, ResolvedVoice>,
}

impl StaticRegistry {
    pub fn new(voices: impl IntoIterator<Item = ResolvedVoice>) -> Self {
        Self {
            voices: voices.into_iter().map(|v| (v.id.clone(), v)).collect(),
        }
    }
}

#[async_trait]
impl VoiceRegistry for StaticRegistry {
    async fn list_voices(&self) -> Result<Vec<VoiceDescriptor>, RegistryError> {
        let mut voices: Vec<VoiceDescriptor> = self
            .voices
            .values()
            .map(|v| VoiceDescriptor {
                id: v.id.clone(),
                description: v.id.clone(),
                languages: v.id.split('-').next().map(str::to_string).into_iter().collect(),
                sample_rate: Some(v.sample_rate),
                speakers: v.speaker_names(),
                quality: v.id.rsplit('-').next().map(str::to_string),
                installed: true,
            })
            .collect();
        voices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(voices)
    }

    async fn resolve(&self, voice_id: &str) -> Result<ResolvedVoice, RegistryError> {
        self.voices
            .get(voice_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(voice_id.to_string()))
    }
}

/// One acquire/release interval recorded by [`RecordingObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub worker: WorkerId,
    pub request: RequestId,
    pub acquired: Instant,
    pub released: Option<Instant>,
}

/// Pool observer keeping the acquire/release interval log.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    log: Mutex<Vec<Interval>>,
}

impl RecordingObserver {
    pub fn intervals(&self) -> Vec<Interval> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Intervals still open.
    pub fn held(&self) -> usize {
        self.intervals()
            .iter()
            .filter(|i| i.released.is_none())
            .count()
    }

    /// Pairs of intervals on the same worker that overlap in time.
    pub fn overlaps(&self) -> Vec<(Interval, Interval)> {
        let log = self.intervals();
        let mut overlaps = Vec::new();
        for (i, a) in log.iter().enumerate() {
            for b in &log[i + 1..] {
                if a.worker != b.worker {
                    continue;
                }
                let a_end = a.released.unwrap_or_else(Instant::now);
                let b_end = b.released.unwrap_or_else(Instant::now);
                if a.acquired < b_end && b.acquired < a_end {
                    overlaps.push((*a, *b));
                }
            }
        }
        overlaps
    }
}

impl PoolObserver for RecordingObserver {
    fn on_acquire(&self, worker: WorkerId, request: RequestId) {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        assert!(
            !log.iter()
                .any(|i| i.worker == worker && i.released.is_none()),
            "{worker} acquired by {request} while still held"
        );
        log.push(Interval {
            worker,
            request,
            acquired: Instant::now(),
            released: None,
        });
    }

    fn on_release(&self, worker: WorkerId, request: RequestId) {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(open) = log
            .iter_mut()
            .rev()
            .find(|i| i.worker == worker && i.request == request && i.released.is_none())
        {
            open.released = Some(Instant::now());
        }
    }
}
