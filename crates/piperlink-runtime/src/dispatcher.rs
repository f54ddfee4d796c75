//! Synthesis dispatch: pool lease, engine job, watchdog and framing.
//!
//! [`SynthesisDispatcher::synthesize`] returns a lazy stream. Nothing
//! happens until it is polled; dropping it at any point releases the worker
//! through the lease.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use futures_core::Stream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use piperlink_core::audio::DEFAULT_SAMPLES_PER_CHUNK;
use piperlink_core::{
    AudioChunk, AudioFramer, BridgeConfig, EngineBackend, EngineError, EngineJob, EngineParams,
    EngineRead, EngineSpec, PreparedRequest, SynthesisError,
};

use crate::pool::{EnginePool, Lease, PoolConfig, PoolObserver, PoolStats};

/// Per-request timing and framing settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatcherConfig {
    /// Longest wait for the first audio byte after the job is written.
    pub first_byte_timeout: Duration,
    /// Longest wait between two reads once audio has started.
    pub chunk_gap_timeout: Duration,
    /// Default chunk size, overridable per request.
    pub samples_per_chunk: usize,
    pub params: EngineParams,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            first_byte_timeout: Duration::from_secs(30),
            chunk_gap_timeout: Duration::from_secs(10),
            samples_per_chunk: DEFAULT_SAMPLES_PER_CHUNK,
            params: EngineParams::default(),
        }
    }
}

impl DispatcherConfig {
    pub const fn from_bridge(config: &BridgeConfig) -> Self {
        Self {
            first_byte_timeout: config.first_byte_timeout(),
            chunk_gap_timeout: config.chunk_gap_timeout(),
            samples_per_chunk: config.samples_per_chunk,
            params: config.engine_params(),
        }
    }
}

/// Release a lease whose request failed.
async fn release_failed(lease: Lease, error: &SynthesisError) {
    if error.discards_worker() {
        lease.discard().await;
    } else {
        lease.complete().await;
    }
}

enum Step {
    Read(Result<EngineRead, EngineError>),
    TimedOut(Duration),
    Cancelled,
}

/// Serves synthesis requests from a bounded engine pool.
#[derive(Clone)]
pub struct SynthesisDispatcher {
    pool: EnginePool,
    config: DispatcherConfig,
}

impl SynthesisDispatcher {
    pub const fn new(pool: EnginePool, config: DispatcherConfig) -> Self {
        Self { pool, config }
    }

    /// Build the pool and dispatcher from bridge configuration.
    pub fn from_bridge(
        backend: Arc<dyn EngineBackend>,
        config: &BridgeConfig,
        observer: Option<Arc<dyn PoolObserver>>,
    ) -> Self {
        let pool = EnginePool::with_observer(backend, PoolConfig::from_bridge(config), observer);
        Self::new(pool, DispatcherConfig::from_bridge(config))
    }

    pub const fn pool(&self) -> &EnginePool {
        &self.pool
    }

    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    /// Synthesize one prepared request.
    ///
    /// Yields audio chunks in production order; the last successful item has
    /// `is_last` set. On failure exactly one `Err` is yielded and the stream
    /// ends. When `cancel` fires the stream ends without an error.
    pub fn synthesize(
        &self,
        prepared: PreparedRequest,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<AudioChunk, SynthesisError>> + Send + 'static {
        let pool = self.pool.clone();
        let config = self.config;

        stream! {
            let request = prepared.id();
            let voice = prepared.voice.id.clone();
            let spec = EngineSpec::new(prepared.voice, config.params);
            let started = Instant::now();

            let mut lease = match pool.acquire(&spec, request, &cancel).await {
                Ok(lease) => lease,
                Err(e) => {
                    if e != SynthesisError::Cancelled {
                        warn!(request = %request, voice = %voice, error = %e, "Could not acquire worker");
                    }
                    yield Err(e);
                    return;
                }
            };
            let worker = lease.worker();

            let job = EngineJob {
                text: prepared.request.text,
                speaker_id: prepared.speaker_id,
            };
            debug!(
                request = %request,
                worker = %worker,
                voice = %voice,
                chars = job.text.chars().count(),
                "Dispatching synthesis"
            );

            let written = match timeout(config.first_byte_timeout, lease.write(&job)).await {
                Ok(result) => result.map_err(SynthesisError::from),
                Err(_) => Err(SynthesisError::Timeout(config.first_byte_timeout)),
            };
            if let Err(e) = written {
                warn!(request = %request, worker = %worker, error = %e, "Engine rejected job");
                release_failed(lease, &e).await;
                yield Err(e);
                return;
            }

            let samples = prepared
                .request
                .hints
                .samples_per_chunk
                .unwrap_or(config.samples_per_chunk);
            let mut framer = AudioFramer::new(lease.format(), samples);
            let read_size = framer.max_chunk_bytes();
            let mut audio_bytes = 0usize;

            loop {
                let bound = if audio_bytes == 0 {
                    config.first_byte_timeout
                } else {
                    config.chunk_gap_timeout
                };

                let step = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Step::Cancelled,
                    read = timeout(bound, lease.read(read_size)) => {
                        read.map_or(Step::TimedOut(bound), Step::Read)
                    }
                };

                match step {
                    Step::Read(Ok(EngineRead::Audio(bytes))) => {
                        audio_bytes += bytes.len();
                        for chunk in framer.push(&bytes) {
                            yield Ok(chunk);
                        }
                    }
                    Step::Read(Ok(EngineRead::End)) => {
                        let tail = framer.finish();
                        let chunks = framer.emitted();
                        for chunk in tail {
                            yield Ok(chunk);
                        }
                        lease.complete().await;
                        info!(
                            request = %request,
                            worker = %worker,
                            voice = %voice,
                            bytes = audio_bytes,
                            chunks,
                            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                            "Synthesis complete"
                        );
                        return;
                    }
                    Step::Read(Err(e)) => {
                        warn!(request = %request, worker = %worker, error = %e, "Engine failed mid-request");
                        let error = SynthesisError::from(e);
                        release_failed(lease, &error).await;
                        yield Err(error);
                        return;
                    }
                    Step::TimedOut(bound) => {
                        warn!(
                            request = %request,
                            worker = %worker,
                            bound_ms = u64::try_from(bound.as_millis()).unwrap_or(u64::MAX),
                            "Engine watchdog expired; terminating"
                        );
                        let error = SynthesisError::Timeout(bound);
                        release_failed(lease, &error).await;
                        yield Err(error);
                        return;
                    }
                    Step::Cancelled => {
                        debug!(request = %request, worker = %worker, "Synthesis cancelled");
                        // The lease drop hands the worker to the reclaimer
                        return;
                    }
                }
            }
        }
    }
}
