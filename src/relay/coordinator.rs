//! Exactly-once session finalization.
//!
//! Every path that can end a session (peer close frame, read failure or idle
//! timeout in the egress pump, write failure or cancellation in the ingress
//! pump) calls [`CloseCoordinator::finish`]. The first caller wins a
//! compare-and-swap on the phase and performs the shutdown; every later call
//! is a no-op.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::WsSink;
use crate::sink::{Completion, CompletionReason, CompletionSink};
use crate::state::ConnectionState;

const ACTIVE: u8 = 0;
const FINALIZING: u8 = 1;
const CLOSED: u8 = 2;

/// Finalization phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Active,
    Finalizing,
    Closed,
}

pub(crate) struct CloseCoordinator<S> {
    session: Uuid,
    phase: AtomicU8,
    state: ConnectionState,
    sink: WsSink<S>,
    completion: Arc<dyn CompletionSink>,
    write_timeout: Duration,
    finished: CancellationToken,
}

impl<S> CloseCoordinator<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(
        session: Uuid,
        state: ConnectionState,
        sink: WsSink<S>,
        completion: Arc<dyn CompletionSink>,
        write_timeout: Duration,
        finished: CancellationToken,
    ) -> Self {
        Self {
            session,
            phase: AtomicU8::new(ACTIVE),
            state,
            sink,
            completion,
            write_timeout,
            finished,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        match self.phase.load(Ordering::Acquire) {
            ACTIVE => Phase::Active,
            FINALIZING => Phase::Finalizing,
            _ => Phase::Closed,
        }
    }

    /// End the session. Returns `true` if this call performed the shutdown.
    ///
    /// The winner closes the connection state (waking both pumps), invokes
    /// the completion sink, then sends a close frame under the write
    /// deadline and releases the writer.
    pub(crate) async fn finish(&self, reason: CompletionReason, exit_code: Option<i32>) -> bool {
        if self
            .phase
            .compare_exchange(ACTIVE, FINALIZING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(session = %self.session, phase = ?self.phase(), %reason, "Exec: trigger ignored");
            return false;
        }

        self.state.close();

        let completion = Completion::new(reason, exit_code);
        if completion.success {
            info!(
                session = %self.session,
                reason = %completion.reason,
                exit_code = ?completion.exit_code,
                "Exec: session finished"
            );
        } else {
            warn!(
                session = %self.session,
                reason = %completion.reason,
                "Exec: session terminated"
            );
        }
        if let Err(e) = self.completion.complete(completion).await {
            warn!(session = %self.session, "Exec: completion sink failed: {e}");
        }

        self.release().await;
        self.phase.store(CLOSED, Ordering::Release);
        self.finished.cancel();
        true
    }

    async fn release(&self) {
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session = %self.session, "Exec: close frame not sent: {e}"),
            Err(_) => debug!(
                session = %self.session,
                "Exec: close frame timed out after {:?}", self.write_timeout
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio::io::DuplexStream;
    use tokio::sync::{mpsc, Mutex};
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    async fn coordinator() -> (
        Arc<CloseCoordinator<DuplexStream>>,
        WebSocketStream<DuplexStream>,
        mpsc::UnboundedReceiver<Completion>,
        CancellationToken,
    ) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let ws = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
        let peer = WebSocketStream::from_raw_socket(b, Role::Server, None).await;
        let (sink, _stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let finished = CancellationToken::new();
        let coord = CloseCoordinator::new(
            Uuid::new_v4(),
            ConnectionState::connected(),
            Arc::new(Mutex::new(sink)),
            Arc::new(tx),
            Duration::from_secs(10),
            finished.clone(),
        );
        (Arc::new(coord), peer, rx, finished)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_triggers_complete_exactly_once() {
        let (coord, _peer, mut rx, finished) = coordinator().await;

        let mut tasks = Vec::new();
        for i in 0..16u16 {
            let c = Arc::clone(&coord);
            tasks.push(tokio::spawn(async move {
                let reason = if i % 2 == 0 {
                    CompletionReason::ReadFailed(format!("trigger {i}"))
                } else {
                    CompletionReason::PeerClosed {
                        code: 1000,
                        reason: String::new(),
                    }
                };
                c.finish(reason, None).await
            }));
        }
        let mut winners = 0;
        for t in tasks {
            if t.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(coord.phase(), Phase::Closed);
        assert!(finished.is_cancelled());

        drop(coord);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn finish_closes_state_and_sends_close_frame() {
        let (coord, mut peer, mut rx, _finished) = coordinator().await;
        assert_eq!(coord.phase(), Phase::Active);
        assert!(coord.state.is_connected());

        assert!(
            coord
                .finish(
                    CompletionReason::PeerClosed {
                        code: 1000,
                        reason: "process exited".into(),
                    },
                    None,
                )
                .await
        );
        assert!(!coord.state.is_connected());

        let completion = rx.recv().await.unwrap();
        assert!(completion.success);

        let msg = peer.next().await.unwrap().unwrap();
        assert!(matches!(msg, Message::Close(_)));

        assert!(!coord.finish(CompletionReason::StreamEnded, None).await);
    }

    #[tokio::test]
    async fn completion_sink_error_still_releases() {
        let (a, _b) = tokio::io::duplex(1024);
        let ws = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
        let (sink, _stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel::<Completion>();
        drop(rx);
        let finished = CancellationToken::new();
        let coord = CloseCoordinator::new(
            Uuid::new_v4(),
            ConnectionState::connected(),
            Arc::new(Mutex::new(sink)),
            Arc::new(tx),
            Duration::from_secs(1),
            finished.clone(),
        );

        assert!(coord.finish(CompletionReason::IdleTimeout, None).await);
        assert_eq!(coord.phase(), Phase::Closed);
        assert!(finished.is_cancelled());
    }
}
