//! Error types surfaced by the relay.
//!
//! Only [`RelayError`] is returned synchronously, and only while a session is
//! starting. Once both pumps are running, failures travel through the
//! completion sink as a [`CompletionReason`](crate::sink::CompletionReason).

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors returned by [`ExecRelay::exec`](crate::ExecRelay::exec) and the
/// lower-level `resolve`/`dial` steps.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The cluster endpoint could not be turned into an exec URL.
    #[error("invalid cluster host {host:?}: {reason}")]
    Resolve { host: String, reason: String },

    /// The WebSocket upgrade did not complete.
    #[error("dial to {target} failed: {source}")]
    Dial {
        target: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RelayError {
    pub(crate) fn resolve(host: &str, reason: impl Into<String>) -> Self {
        Self::Resolve {
            host: host.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn dial(
        target: &str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Dial {
            target: target.to_string(),
            source: source.into(),
        }
    }

    /// `true` for failures that happened before any connection existed.
    pub fn is_resolve(&self) -> bool {
        matches!(self, Self::Resolve { .. })
    }

    pub fn is_dial(&self) -> bool {
        matches!(self, Self::Dial { .. })
    }
}

/// Post-dial I/O failures. These terminate the pump that hit them and become
/// a coordinator trigger.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("write failed: {0}")]
    Write(#[source] tungstenite::Error),

    #[error("read failed: {0}")]
    Read(#[source] tungstenite::Error),

    #[error("no pong received within {0:?}")]
    IdleTimeout(Duration),
}

impl From<TransportError> for crate::sink::CompletionReason {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::IdleTimeout(_) => Self::IdleTimeout,
            TransportError::Read(_) => Self::ReadFailed(e.to_string()),
            TransportError::Write(_) | TransportError::WriteTimeout(_) => {
                Self::WriteFailed(e.to_string())
            }
        }
    }
}

/// Returned by [`SessionHandle::send`](crate::SessionHandle::send).
#[derive(Debug, Error)]
pub enum InputError {
    #[error("stdin is not enabled for this session")]
    Disabled,
    #[error("session input is closed")]
    Closed,
}
