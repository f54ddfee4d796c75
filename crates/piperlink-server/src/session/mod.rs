//! Per-connection session handling.

mod handler;
mod state;

use std::io;

use thiserror::Error;

use crate::protocol::ProtocolError;

pub use handler::{run_session, SessionConfig, SessionContext};
pub use state::{Action, SessionState};

/// Why a session ended abnormally.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[source] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[source] ProtocolError),
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => Self::Transport(e),
            other => Self::Protocol(other),
        }
    }
}
