//! Process management and synthesis dispatch for piperlink.
//!
//! - `piper`: the Piper implementation of the engine port (one-shot and
//!   persistent modes)
//! - `pool`: bounded, FIFO-fair pool of engine processes with leases
//! - `dispatcher`: turns a prepared request into a lazy stream of audio
//!   chunks, with a per-request watchdog
//! - `process`: child shutdown and stderr forwarding helpers

#![deny(unused_crate_dependencies)]

pub mod dispatcher;
pub mod piper;
pub mod pool;
pub mod process;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use dispatcher::{DispatcherConfig, SynthesisDispatcher};
pub use piper::PiperBackend;
pub use pool::{EnginePool, Lease, PoolConfig, PoolObserver, PoolStats, WorkerId};

#[cfg(test)]
use tokio_test as _;
