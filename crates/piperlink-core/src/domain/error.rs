//! Request-scoped synthesis errors.

use std::time::Duration;

use thiserror::Error;

/// The single error type a session sees for one synthesis request.
///
/// Every engine and process failure is translated into one of these at the
/// worker/dispatcher boundary; clients never see raw process errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SynthesisError {
    /// Empty text, unknown voice or unknown speaker. No worker was acquired.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The engine could not be spawned (after one respawn attempt) or the
    /// pool is shutting down.
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The engine process died or failed I/O mid-request.
    #[error("Engine crashed: {0}")]
    EngineCrash(String),

    /// The engine produced no output within the watchdog bound.
    #[error("Engine timed out after {0:?}")]
    Timeout(Duration),

    /// The request was abandoned by its session.
    #[error("Request cancelled")]
    Cancelled,
}

impl SynthesisError {
    /// Stable error code sent to clients in `error` events.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid-request",
            Self::EngineUnavailable(_) => "engine-unavailable",
            Self::EngineCrash(_) => "engine-crash",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the worker that served the request must be discarded.
    #[must_use]
    pub const fn discards_worker(&self) -> bool {
        matches!(self, Self::EngineCrash(_) | Self::Timeout(_))
    }
}
