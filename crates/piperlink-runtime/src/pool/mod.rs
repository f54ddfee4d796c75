//! Bounded pool of engine processes.
//!
//! Acquisition is gated by a fair semaphore with one permit per slot, so
//! waiting requests are served strictly first-come first-served. The permit
//! travels with the [`Lease`] and is only returned once the slot is settled
//! (parked idle or emptied), which keeps a slot invisible to other requests
//! while a dropped lease is being reclaimed.

mod lease;
mod slot;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use piperlink_core::{
    BridgeConfig, EngineBackend, EngineProcess, EngineSpec, RequestId, SynthesisError,
};

pub use lease::Lease;
pub use slot::{PoolStats, WorkerId};

use slot::SlotTable;

/// Hook notified of every acquire and release, in slot order.
///
/// Both callbacks run while the slot table is locked, so for any one worker
/// the sequence of calls is exactly the sequence of ownership changes.
pub trait PoolObserver: Send + Sync {
    fn on_acquire(&self, worker: WorkerId, request: RequestId);
    fn on_release(&self, worker: WorkerId, request: RequestId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of slots (maximum concurrent engine processes).
    pub size: usize,
    /// Grace period between SIGTERM and SIGKILL.
    pub terminate_grace: Duration,
    /// How long a dropped in-flight lease may drain before its process is
    /// killed.
    pub reclaim_timeout: Duration,
}

impl PoolConfig {
    pub fn from_bridge(config: &BridgeConfig) -> Self {
        Self {
            size: config.pool_size,
            terminate_grace: config.terminate_grace(),
            reclaim_timeout: config.first_byte_timeout().max(config.chunk_gap_timeout()),
        }
    }
}

pub(crate) struct PoolInner {
    backend: Arc<dyn EngineBackend>,
    table: Mutex<SlotTable>,
    permits: Arc<Semaphore>,
    config: PoolConfig,
    observer: Option<Arc<dyn PoolObserver>>,
    closed: AtomicBool,
}

impl PoolInner {
    fn table(&self) -> MutexGuard<'_, SlotTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Park a live process. Hands it back if the pool has shut down.
    pub(crate) fn park(
        &self,
        index: usize,
        worker: WorkerId,
        request: RequestId,
        process: Box<dyn EngineProcess>,
        spec: EngineSpec,
    ) -> Option<Box<dyn EngineProcess>> {
        let mut table = self.table();
        if self.closed.load(Ordering::SeqCst) {
            return Some(process);
        }
        debug_assert_eq!(table.holder(index), Some(request));
        if let Some(observer) = &self.observer {
            observer.on_release(worker, request);
        }
        table.park(index, process, spec);
        debug!(worker = %worker, request = %request, "Worker released (idle)");
        None
    }

    /// Release a slot whose process is gone.
    pub(crate) fn clear(&self, index: usize, worker: WorkerId, request: RequestId) {
        let mut table = self.table();
        debug_assert_eq!(table.holder(index), Some(request));
        if let Some(observer) = &self.observer {
            observer.on_release(worker, request);
        }
        table.clear(index);
        debug!(worker = %worker, request = %request, "Worker released (empty)");
    }
}

/// Releases a claimed slot unless disarmed; covers errors and cancellation
/// between claiming a slot and handing out its lease.
struct ClaimGuard<'a> {
    pool: &'a PoolInner,
    index: usize,
    worker: WorkerId,
    request: RequestId,
    armed: bool,
}

impl ClaimGuard<'_> {
    const fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.clear(self.index, self.worker, self.request);
        }
    }
}

/// Shared handle to the engine pool.
#[derive(Clone)]
pub struct EnginePool {
    inner: Arc<PoolInner>,
}

impl EnginePool {
    pub fn new(backend: Arc<dyn EngineBackend>, config: PoolConfig) -> Self {
        Self::with_observer(backend, config, None)
    }

    pub fn with_observer(
        backend: Arc<dyn EngineBackend>,
        config: PoolConfig,
        observer: Option<Arc<dyn PoolObserver>>,
    ) -> Self {
        let size = config.size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                backend,
                table: Mutex::new(SlotTable::new(size)),
                permits: Arc::new(Semaphore::new(size)),
                config: PoolConfig { size, ..config },
                observer,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.config.size
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.table().stats()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Claim a worker for `spec`, waiting in FIFO order while all are busy.
    ///
    /// A parked process bound to another spec, or one that has died, is
    /// replaced. Spawning is retried once before the request fails with
    /// [`SynthesisError::EngineUnavailable`].
    pub async fn acquire(
        &self,
        spec: &EngineSpec,
        request: RequestId,
        cancel: &CancellationToken,
    ) -> Result<Lease, SynthesisError> {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SynthesisError::Cancelled),
            permit = Arc::clone(&self.inner.permits).acquire_owned() => {
                permit.map_err(|_| shutting_down())?
            }
        };

        let claim = {
            let mut table = self.inner.table();
            if self.is_closed() {
                return Err(shutting_down());
            }
            let claim = table.claim(spec, request).ok_or_else(|| {
                SynthesisError::EngineUnavailable("no free worker slot".to_string())
            })?;
            if let Some(observer) = &self.inner.observer {
                observer.on_acquire(claim.worker, request);
            }
            claim
        };
        debug!(
            worker = %claim.worker,
            request = %request,
            voice = %spec.voice.id,
            "Worker acquired"
        );

        let mut guard = ClaimGuard {
            pool: &self.inner,
            index: claim.index,
            worker: claim.worker,
            request,
            armed: true,
        };

        let process = match claim.previous {
            Some((mut process, previous)) => {
                if previous == *spec && process.is_alive() {
                    process
                } else {
                    if previous == *spec {
                        warn!(worker = %claim.worker, "Idle engine died; respawning");
                    } else {
                        debug!(
                            worker = %claim.worker,
                            from = %previous.voice.id,
                            to = %spec.voice.id,
                            "Switching worker voice"
                        );
                    }
                    process.terminate(self.inner.config.terminate_grace).await;
                    self.spawn(spec, claim.worker).await?
                }
            }
            None => self.spawn(spec, claim.worker).await?,
        };

        guard.disarm();
        Ok(Lease::new(
            Arc::clone(&self.inner),
            claim.index,
            claim.worker,
            request,
            spec.clone(),
            process,
            permit,
        ))
    }

    async fn spawn(
        &self,
        spec: &EngineSpec,
        worker: WorkerId,
    ) -> Result<Box<dyn EngineProcess>, SynthesisError> {
        match self.inner.backend.spawn(spec).await {
            Ok(process) => Ok(process),
            Err(first) => {
                warn!(worker = %worker, error = %first, "Engine spawn failed; retrying once");
                self.inner.backend.spawn(spec).await.map_err(|e| {
                    warn!(worker = %worker, error = %e, "Engine respawn failed");
                    SynthesisError::EngineUnavailable(e.to_string())
                })
            }
        }
    }

    /// Stop accepting work and terminate every idle process.
    ///
    /// Busy workers are terminated by their leases on release.
    pub async fn shutdown(&self) {
        let idle = {
            let mut table = self.inner.table();
            self.inner.closed.store(true, Ordering::SeqCst);
            table.drain_idle()
        };
        self.inner.permits.close();

        let count = idle.len();
        let grace = self.inner.config.terminate_grace;
        join_all(idle.into_iter().map(|process| process.terminate(grace))).await;
        info!(terminated = count, "Engine pool shut down");
    }
}

fn shutting_down() -> SynthesisError {
    SynthesisError::EngineUnavailable("shutting down".to_string())
}
