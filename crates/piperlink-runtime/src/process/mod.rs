//! OS-level helpers for engine child processes.

mod shutdown;
mod stream;

pub use shutdown::shutdown_child;
pub use stream::spawn_stderr_logger;
