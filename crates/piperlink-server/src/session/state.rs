//! Session states and the per-state rules for client events.

use std::fmt;

use crate::protocol::{ClientEvent, ProtocolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected; waiting for `describe`.
    Handshake,
    /// Ready for `synthesize`.
    Idle,
    /// Streaming audio for one request.
    Synthesizing,
    /// Tearing down; no further events are handled.
    Closing,
    Closed,
}

/// What the session should do with an accepted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SendInfo,
    Pong(Option<String>),
    Synthesize(crate::protocol::Synthesize),
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Idle => "idle",
            Self::Synthesizing => "synthesizing",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Validate `event` in this state and return the state to move to with
    /// the action to run.
    ///
    /// `synthesize` before `describe` is out of order when `strict` is set;
    /// otherwise it completes the handshake implicitly.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::OutOfOrder`] when the event is not allowed here.
    pub fn accept(self, event: ClientEvent, strict: bool) -> Result<(Self, Action), ProtocolError> {
        let out_of_order = |event: &ClientEvent| ProtocolError::OutOfOrder {
            event: event.name().to_string(),
            state: self.as_str(),
        };

        match (self, event) {
            (Self::Closing | Self::Closed, event) => Err(out_of_order(&event)),
            (Self::Handshake, ClientEvent::Describe) => Ok((Self::Idle, Action::SendInfo)),
            (state, ClientEvent::Describe) => Ok((state, Action::SendInfo)),
            (state, ClientEvent::Ping { text }) => Ok((state, Action::Pong(text))),
            (Self::Handshake, event @ ClientEvent::Synthesize(_)) if strict => {
                Err(out_of_order(&event))
            }
            (Self::Handshake | Self::Idle, ClientEvent::Synthesize(request)) => {
                Ok((Self::Synthesizing, Action::Synthesize(request)))
            }
            (Self::Synthesizing, event @ ClientEvent::Synthesize(_)) => Err(out_of_order(&event)),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
