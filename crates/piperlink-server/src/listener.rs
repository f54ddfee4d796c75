//! Transport listeners and the accept loop.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

use crate::session::{run_session, SessionContext};

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(50);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid listen URI '{uri}': {message}")]
    InvalidUri { uri: String, message: String },

    #[error("Unsupported URI scheme '{0}' (expected tcp, unix or stdio)")]
    UnsupportedScheme(String),

    #[error("Failed to listen on {uri}: {source}")]
    Bind {
        uri: String,
        #[source]
        source: io::Error,
    },
}

/// Where to accept connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenUri {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
    Stdio,
}

impl FromStr for ListenUri {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| ServerError::InvalidUri {
            uri: s.to_string(),
            message: message.to_string(),
        };
        let url = Url::parse(s).map_err(|e| invalid(&e.to_string()))?;

        match url.scheme() {
            "tcp" => {
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| invalid("missing host"))?;
                let port = url.port().ok_or_else(|| invalid("missing port"))?;
                Ok(Self::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            "unix" => {
                // Keep relative paths like unix://piper.sock intact
                let path = s.strip_prefix("unix://").unwrap_or_default();
                if path.is_empty() {
                    return Err(invalid("missing socket path"));
                }
                Ok(Self::Unix(PathBuf::from(path)))
            }
            "stdio" => Ok(Self::Stdio),
            other => Err(ServerError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for ListenUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Stdio => f.write_str("stdio://"),
        }
    }
}

/// A bound transport, ready to serve.
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
    },
    Stdio,
}

impl Listener {
    /// Bind `uri`. A stale Unix socket file is removed first.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] when the address cannot be bound.
    pub async fn bind(uri: &ListenUri) -> Result<Self, ServerError> {
        let bind_err = |source| ServerError::Bind {
            uri: uri.to_string(),
            source,
        };

        match uri {
            ListenUri::Tcp { host, port } => TcpListener::bind((host.as_str(), *port))
                .await
                .map(Self::Tcp)
                .map_err(bind_err),
            #[cfg(unix)]
            ListenUri::Unix(path) => {
                if path.exists() {
                    debug!(path = %path.display(), "Removing stale socket");
                    std::fs::remove_file(path).map_err(bind_err)?;
                }
                let listener = tokio::net::UnixListener::bind(path).map_err(bind_err)?;
                Ok(Self::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            #[cfg(not(unix))]
            ListenUri::Unix(_) => Err(ServerError::UnsupportedScheme("unix".to_string())),
            ListenUri::Stdio => Ok(Self::Stdio),
        }
    }

    /// Bound TCP address, for `tcp://HOST:0` listeners.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            _ => None,
        }
    }
}

trait Acceptor {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn accept_conn(&self) -> impl Future<Output = io::Result<(Self::Stream, String)>> + Send;
}

impl Acceptor for TcpListener {
    type Stream = TcpStream;

    async fn accept_conn(&self) -> io::Result<(TcpStream, String)> {
        let (stream, addr) = self.accept().await?;
        let peer = addr.to_string();
        nodelay_applied(stream.set_nodelay(true), &peer);
        Ok((stream, peer))
    }
}

/// A connection that refuses `TCP_NODELAY` is still served.
fn nodelay_applied(result: io::Result<()>, peer: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(peer, error = %e, "Could not set TCP_NODELAY");
            false
        }
    }
}

#[cfg(unix)]
impl Acceptor for tokio::net::UnixListener {
    type Stream = tokio::net::UnixStream;

    async fn accept_conn(&self) -> io::Result<(tokio::net::UnixStream, String)> {
        let (stream, _) = self.accept().await?;
        Ok((stream, "unix".to_string()))
    }
}

/// Serve sessions until `shutdown` fires (or, for stdio, until the one
/// session ends), then wait for in-flight sessions to finish.
pub async fn serve(listener: Listener, ctx: Arc<SessionContext>, shutdown: CancellationToken) {
    match listener {
        Listener::Tcp(listener) => {
            if let Ok(addr) = listener.local_addr() {
                info!(%addr, "Listening on TCP");
            }
            accept_loop(&listener, ctx, shutdown).await;
        }
        #[cfg(unix)]
        Listener::Unix { listener, path } => {
            info!(path = %path.display(), "Listening on Unix socket");
            accept_loop(&listener, ctx, shutdown).await;
            if let Err(e) = std::fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "Could not remove socket");
            }
        }
        Listener::Stdio => {
            info!("Serving one session on stdio");
            let _ = run_session(ctx, tokio::io::stdin(), tokio::io::stdout(), shutdown, "stdio")
                .await;
        }
    }
}

async fn accept_loop<A: Acceptor + Sync>(
    acceptor: &A,
    ctx: Arc<SessionContext>,
    shutdown: CancellationToken,
) {
    let tracker = TaskTracker::new();
    let mut backoff = ACCEPT_BACKOFF_MIN;

    loop {
        let accepted = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            accepted = acceptor.accept_conn() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                backoff = ACCEPT_BACKOFF_MIN;
                let ctx = Arc::clone(&ctx);
                let shutdown = shutdown.clone();
                tracker.spawn(async move {
                    let (reader, writer) = tokio::io::split(stream);
                    let _ = run_session(ctx, reader, writer, shutdown, &peer).await;
                });
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retry_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "Accept failed; retrying"
                );
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
            }
        }
    }

    tracker.close();
    if !tracker.is_empty() {
        info!(sessions = tracker.len(), "Waiting for open sessions to close");
    }
    tracker.wait().await;
    info!("Listener stopped");
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;

    #[test]
    fn test_parse_tcp() {
        assert_eq!(
            "tcp://0.0.0.0:10200".parse::<ListenUri>().unwrap(),
            ListenUri::Tcp {
                host: "0.0.0.0".into(),
                port: 10200
            }
        );
        assert!(matches!(
            "tcp://127.0.0.1".parse::<ListenUri>(),
            Err(ServerError::InvalidUri { .. })
        ));
    }

    #[test]
    fn test_parse_unix_and_stdio() {
        assert_eq!(
            "unix:///run/piper.sock".parse::<ListenUri>().unwrap(),
            ListenUri::Unix(PathBuf::from("/run/piper.sock"))
        );
        assert_eq!(
            "unix://piper.sock".parse::<ListenUri>().unwrap(),
            ListenUri::Unix(PathBuf::from("piper.sock"))
        );
        assert_eq!("stdio://".parse::<ListenUri>().unwrap(), ListenUri::Stdio);
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(matches!(
            "http://localhost:80".parse::<ListenUri>(),
            Err(ServerError::UnsupportedScheme(s)) if s == "http"
        ));
        assert!("not a uri".parse::<ListenUri>().is_err());
    }

    #[test]
    fn test_display_round_trips_tcp() {
        let uri = ListenUri::Tcp {
            host: "127.0.0.1".into(),
            port: 10200,
        };
        assert_eq!(uri.to_string(), "tcp://127.0.0.1:10200");
    }

    #[tokio::test]
    async fn test_bind_tcp_ephemeral_port() {
        let uri: ListenUri = "tcp://127.0.0.1:0".parse().unwrap();
        let listener = assert_ok!(Listener::bind(&uri).await);
        assert!(listener.local_addr().is_some_and(|a| a.port() != 0));
    }

    #[tokio::test]
    async fn test_tcp_accept_sets_nodelay() {
        let listener = assert_ok!(TcpListener::bind("127.0.0.1:0").await);
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(TcpStream::connect(addr));

        let (stream, peer) = assert_ok!(listener.accept_conn().await);
        assert!(stream.nodelay().unwrap());
        assert!(peer.starts_with("127.0.0.1:"));
        assert_ok!(client.await.unwrap());
    }

    #[test]
    fn test_nodelay_failure_keeps_connection() {
        assert!(nodelay_applied(Ok(()), "127.0.0.1:1"));
        assert!(!nodelay_applied(
            Err(io::Error::from(io::ErrorKind::InvalidInput)),
            "127.0.0.1:1"
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_unix_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("piper.sock");
        std::fs::write(&path, b"stale").unwrap();

        let listener = assert_ok!(Listener::bind(&ListenUri::Unix(path.clone())).await);
        assert!(matches!(listener, Listener::Unix { .. }));
        assert!(listener.local_addr().is_none());
        tokio::net::UnixStream::connect(&path).await.unwrap();
    }
}
