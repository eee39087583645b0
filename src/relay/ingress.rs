//! Ingress pump: caller input → connection, plus liveness probes.
//!
//! This task is the only writer of data and ping frames. When the session
//! has stdin disabled it still runs, sending pings only, so the egress pump's
//! pong-driven read deadline keeps moving.

use std::time::Duration;

use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::Utf8Bytes;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{PumpContext, WsSink};
use crate::error::TransportError;
use crate::sink::CompletionReason;

pub(crate) async fn run<S>(
    ctx: PumpContext<S>,
    sink: WsSink<S>,
    mut input: Option<mpsc::Receiver<Bytes>>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let write_timeout = ctx.settings.write_timeout;
    let period = ctx.settings.probe_interval();
    let mut probes = tokio::time::interval_at(Instant::now() + period, period);
    probes.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while ctx.state.is_connected() {
        tokio::select! {
            () = ctx.state.closed() => break,
            () = cancel.cancelled() => {
                debug!(session = %ctx.session, "Exec: cancelled by caller");
                if let Err(e) = write_frame(&sink, normal_close(), write_timeout).await {
                    debug!(session = %ctx.session, "Exec: close frame on cancel failed: {e}");
                }
                ctx.coordinator.finish(CompletionReason::Cancelled, None).await;
                break;
            }
            item = next_input(&mut input) => {
                let Some(chunk) = item else {
                    // Producer hung up: ask the peer to close and let the
                    // egress pump observe the reply.
                    debug!(session = %ctx.session, "Exec: input closed, sending close frame");
                    if let Err(e) = write_frame(&sink, normal_close(), write_timeout).await {
                        warn!(session = %ctx.session, "Exec: {e}");
                        ctx.coordinator.finish(e.into(), None).await;
                    }
                    break;
                };
                trace!(session = %ctx.session, bytes = chunk.len(), "Exec: stdin");
                let frame = ctx.settings.protocol.encode_input(chunk);
                if let Err(e) = write_frame(&sink, frame, write_timeout).await {
                    warn!(session = %ctx.session, "Exec: stdin {e}");
                    ctx.coordinator.finish(e.into(), None).await;
                    break;
                }
            }
            _ = probes.tick() => {
                if let Err(e) = write_frame(&sink, Message::Ping(Bytes::new()), write_timeout).await {
                    warn!(session = %ctx.session, "Exec: ping {e}");
                    ctx.coordinator.finish(e.into(), None).await;
                    break;
                }
                trace!(session = %ctx.session, "Exec: ping sent");
            }
        }
    }
    debug!(session = %ctx.session, "Exec: ingress pump stopped");
}

/// Next inbound chunk. Pends forever when the session has no stdin.
async fn next_input(input: &mut Option<mpsc::Receiver<Bytes>>) -> Option<Bytes> {
    match input {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn normal_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: Utf8Bytes::from_static(""),
    }))
}

/// Send one frame, bounded by `deadline` measured from the moment the
/// writer lock is held.
pub(crate) async fn write_frame<S>(
    sink: &WsSink<S>,
    frame: Message,
    deadline: Duration,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut sink = sink.lock().await;
    match tokio::time::timeout(deadline, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransportError::Write(e)),
        Err(_) => Err(TransportError::WriteTimeout(deadline)),
    }
}
