//! Shared liveness flag for one exec connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Monotonic `connected → closed` flag shared by every task that touches a
/// connection.
///
/// Cloning is cheap and every clone observes the same state. Once
/// [`close`](Self::close) has run, [`is_connected`](Self::is_connected)
/// returns `false` forever and [`closed`](Self::closed) resolves immediately.
#[derive(Clone, Debug)]
pub struct ConnectionState {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    connected: AtomicBool,
    closed: CancellationToken,
}

impl ConnectionState {
    /// A fresh state for a connection that just finished its handshake.
    pub fn connected() -> Self {
        Self {
            inner: Arc::new(Inner {
                connected: AtomicBool::new(true),
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Flip to closed. Returns `true` only for the call that performed the
    /// transition.
    pub fn close(&self) -> bool {
        let was_connected = self.inner.connected.swap(false, Ordering::AcqRel);
        if was_connected {
            self.inner.closed.cancel();
        }
        was_connected
    }

    /// Resolves once the state has been closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.inner.closed.cancelled()
    }
}
