//! Caller-facing sinks for output chunks and the completion signal.
//!
//! The relay never knows what sits behind these traits: an RPC callback, a
//! terminal, or a test channel. Ready-made impls exist for
//! `tokio::sync::mpsc::Sender`.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Bytes;

/// Failure reported by a sink. Logged by the relay, never escalated.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink receiver is gone")]
    Closed,
    #[error("sink rejected delivery: {0}")]
    Rejected(String),
}

/// Receives decoded output chunks in wire order.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn deliver(&self, chunk: Bytes) -> Result<(), SinkError>;
}

/// Receives the single completion signal of a session.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn complete(&self, completion: Completion) -> Result<(), SinkError>;
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionReason {
    /// The remote side sent a close frame.
    PeerClosed { code: u16, reason: String },
    /// The stream ended without a close frame.
    StreamEnded,
    /// The caller cancelled the session through its handle.
    Cancelled,
    /// No pong arrived within the idle-timeout window.
    IdleTimeout,
    ReadFailed(String),
    WriteFailed(String),
}

impl CompletionReason {
    /// Orderly endings count as success. The remote exec endpoint offers no
    /// other success signal than closing the stream.
    pub fn is_orderly(&self) -> bool {
        matches!(
            self,
            Self::PeerClosed { .. } | Self::StreamEnded | Self::Cancelled
        )
    }
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed { code, reason } if reason.is_empty() => {
                write!(f, "peer closed ({code})")
            }
            Self::PeerClosed { code, reason } => write!(f, "peer closed ({code}): {reason}"),
            Self::StreamEnded => f.write_str("stream ended"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::IdleTimeout => f.write_str("idle timeout"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::WriteFailed(e) => write!(f, "write failed: {e}"),
        }
    }
}

/// Value passed to [`CompletionSink::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub success: bool,
    pub reason: CompletionReason,
    /// Exit code of the remote command, when the stream protocol reports one.
    pub exit_code: Option<i32>,
}

impl Completion {
    pub fn new(reason: CompletionReason, exit_code: Option<i32>) -> Self {
        Self {
            success: reason.is_orderly(),
            reason,
            exit_code,
        }
    }
}

#[async_trait]
impl OutputSink for mpsc::Sender<Bytes> {
    async fn deliver(&self, chunk: Bytes) -> Result<(), SinkError> {
        self.send(chunk).await.map_err(|_| SinkError::Closed)
    }
}

#[async_trait]
impl OutputSink for mpsc::UnboundedSender<Bytes> {
    async fn deliver(&self, chunk: Bytes) -> Result<(), SinkError> {
        self.send(chunk).map_err(|_| SinkError::Closed)
    }
}

#[async_trait]
impl CompletionSink for mpsc::Sender<Completion> {
    async fn complete(&self, completion: Completion) -> Result<(), SinkError> {
        self.send(completion).await.map_err(|_| SinkError::Closed)
    }
}

#[async_trait]
impl CompletionSink for mpsc::UnboundedSender<Completion> {
    async fn complete(&self, completion: Completion) -> Result<(), SinkError> {
        self.send(completion).map_err(|_| SinkError::Closed)
    }
}
