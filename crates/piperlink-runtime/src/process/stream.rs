//! Forwarding of engine stderr to tracing.
//!
//! Piper (and the espeak-ng/onnxruntime libraries under it) can emit
//! non-UTF-8 bytes. `BufReader::lines()` would stop at the first invalid
//! sequence, so lines are read as bytes and decoded lossily.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawn a task logging every line of `stream` at debug level.
///
/// The task ends at EOF or on the first read error.
pub fn spawn_stderr_logger(
    stream: impl AsyncRead + Unpin + Send + 'static,
    engine: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::with_capacity(256);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = trim_line(&buf);
                    if !line.is_empty() {
                        debug!(engine = %engine, "{}", String::from_utf8_lossy(line));
                    }
                }
                Err(e) => {
                    debug!(engine = %engine, error = %e, "stderr reader exiting due to read error");
                    break;
                }
            }
        }
    })
}

fn trim_line(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}
