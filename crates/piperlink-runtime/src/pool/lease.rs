//! Exclusive claim on one pool slot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OwnedSemaphorePermit;
use tokio::time::timeout;
use tracing::{debug, warn};

use piperlink_core::{
    AudioFormat, EngineError, EngineJob, EngineProcess, EngineRead, EngineSpec, RequestId,
};

use super::{PoolInner, WorkerId};

/// Read size used while draining a dropped lease.
const RECLAIM_READ_BYTES: usize = 64 * 1024;

/// A worker claimed for one request.
///
/// Finish with [`complete`](Self::complete) after end-of-audio or
/// [`discard`](Self::discard) after a failure. Dropping a lease mid-job
/// hands the process to a background task that drains it to end-of-audio
/// within the reclaim timeout, or kills it.
pub struct Lease {
    pool: Arc<PoolInner>,
    index: usize,
    worker: WorkerId,
    request: RequestId,
    spec: EngineSpec,
    process: Option<Box<dyn EngineProcess>>,
    permit: Option<OwnedSemaphorePermit>,
    in_flight: bool,
}

impl Lease {
    pub(super) fn new(
        pool: Arc<PoolInner>,
        index: usize,
        worker: WorkerId,
        request: RequestId,
        spec: EngineSpec,
        process: Box<dyn EngineProcess>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            pool,
            index,
            worker,
            request,
            spec,
            process: Some(process),
            permit: Some(permit),
            in_flight: false,
        }
    }

    pub const fn worker(&self) -> WorkerId {
        self.worker
    }

    pub const fn request(&self) -> RequestId {
        self.request
    }

    pub fn format(&self) -> AudioFormat {
        self.process
            .as_ref()
            .map_or_else(|| self.spec.format(), |p| p.format())
    }

    pub async fn write(&mut self, job: &EngineJob) -> Result<(), EngineError> {
        let process = self.process.as_mut().ok_or(EngineError::Terminated)?;
        self.in_flight = true;
        process.write(job).await
    }

    pub async fn read(&mut self, max: usize) -> Result<EngineRead, EngineError> {
        let process = self.process.as_mut().ok_or(EngineError::Terminated)?;
        let read = process.read(max).await;
        if matches!(read, Ok(EngineRead::End)) {
            self.in_flight = false;
        }
        read
    }

    /// Return the worker after a finished job.
    pub async fn complete(mut self) {
        let reusable = !self.in_flight;
        self.finish(reusable).await;
    }

    /// Terminate the worker and empty its slot.
    pub async fn discard(mut self) {
        self.finish(false).await;
    }

    /// Settle on a spawned task and wait for it. If the caller is dropped
    /// mid-await the task still parks or clears the slot before the permit
    /// goes back.
    async fn finish(&mut self, reusable: bool) {
        let Some(process) = self.process.take() else {
            return;
        };
        let permit = self.permit.take();
        let pool = Arc::clone(&self.pool);
        let (index, worker, request) = (self.index, self.worker, self.request);
        let spec = self.spec.clone();

        let task = tokio::spawn(async move {
            settle(pool, index, worker, request, spec, process, reusable).await;
            drop(permit);
        });
        if let Err(e) = task.await {
            warn!(worker = %worker, request = %request, error = %e, "Worker settle task failed");
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };
        let permit = self.permit.take();
        let pool = Arc::clone(&self.pool);
        let (index, worker, request, in_flight) =
            (self.index, self.worker, self.request, self.in_flight);
        let spec = self.spec.clone();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // No runtime left to drain on; kill_on_drop takes the process down
            pool.clear(index, worker, request);
            return;
        };

        handle.spawn(async move {
            let reusable = if in_flight {
                let bound = pool.config().reclaim_timeout;
                let drained = drain(process.as_mut(), bound).await;
                if drained {
                    debug!(worker = %worker, request = %request, "Reclaimed abandoned worker");
                } else {
                    warn!(
                        worker = %worker,
                        request = %request,
                        "Abandoned worker did not finish in time; terminating"
                    );
                }
                drained
            } else {
                true
            };
            settle(pool, index, worker, request, spec, process, reusable).await;
            drop(permit);
        });
    }
}

/// Read and discard output until end-of-audio. False on error or timeout.
async fn drain(process: &mut dyn EngineProcess, bound: Duration) -> bool {
    let drained = timeout(bound, async {
        loop {
            match process.read(RECLAIM_READ_BYTES).await {
                Ok(EngineRead::Audio(_)) => {}
                Ok(EngineRead::End) => break true,
                Err(_) => break false,
            }
        }
    })
    .await;
    drained.unwrap_or(false)
}

/// Park the process if it can take more work, otherwise stop it and empty
/// the slot.
async fn settle(
    pool: Arc<PoolInner>,
    index: usize,
    worker: WorkerId,
    request: RequestId,
    spec: EngineSpec,
    mut process: Box<dyn EngineProcess>,
    reusable: bool,
) {
    let grace = pool.config().terminate_grace;

    if reusable && process.is_alive() {
        match pool.park(index, worker, request, process, spec) {
            None => return,
            Some(returned) => process = returned,
        }
    }

    process.terminate(grace).await;
    pool.clear(index, worker, request);
}
