//! Wyoming protocol front end for piperlink.
//!
//! - `protocol`: event framing and the typed client/server messages
//! - `session`: one connection's state machine, from handshake to close
//! - `listener`: TCP, Unix socket and stdio transports plus the accept loop
//! - `info`: the `info` description of the Piper program and its voices

#![deny(unused_crate_dependencies)]

pub mod info;
pub mod listener;
pub mod protocol;
pub mod session;

pub use listener::{serve, ListenUri, Listener, ServerError};
pub use session::{run_session, SessionConfig, SessionContext, SessionError, SessionState};
