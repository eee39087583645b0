//! Egress pump: connection → output sink.
//!
//! The only reader of the connection. Keeps a rolling read deadline that
//! every pong pushes forward by the idle-timeout window; when it expires
//! the peer is considered gone.

use std::sync::Arc;

use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace, warn};

use super::PumpContext;
use crate::error::TransportError;
use crate::protocol::Decoded;
use crate::sink::{CompletionReason, OutputSink};

pub(crate) async fn run<S>(
    ctx: PumpContext<S>,
    mut stream: SplitStream<WebSocketStream<S>>,
    output: Arc<dyn OutputSink>,
    forward: bool,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let idle_timeout = ctx.settings.idle_window();
    let protocol = ctx.settings.protocol;
    let mut deadline = Instant::now() + idle_timeout;
    let mut exit_code = None;

    let reason = loop {
        if !ctx.state.is_connected() {
            debug!(session = %ctx.session, "Exec: egress pump stopped");
            return;
        }

        let next = tokio::select! {
            () = ctx.state.closed() => continue,
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
        };
        let msg = match next {
            Err(_) => {
                let e = TransportError::IdleTimeout(idle_timeout);
                warn!(session = %ctx.session, "Exec: {e}");
                break CompletionReason::from(e);
            }
            Ok(None) => break CompletionReason::StreamEnded,
            Ok(Some(Err(
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
            ))) => break CompletionReason::StreamEnded,
            Ok(Some(Err(e))) => {
                let e = TransportError::Read(e);
                warn!(session = %ctx.session, "Exec: {e}");
                break CompletionReason::from(e);
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(_) | Message::Binary(_) => match protocol.decode_output(msg.into_data()) {
                Decoded::Output(chunk) if forward => {
                    trace!(session = %ctx.session, bytes = chunk.len(), "Exec: output");
                    if let Err(e) = output.deliver(chunk).await {
                        warn!(session = %ctx.session, "Exec: output sink failed: {e}");
                    }
                }
                Decoded::Output(chunk) => {
                    trace!(session = %ctx.session, bytes = chunk.len(), "Exec: output discarded");
                }
                Decoded::Status(status) => {
                    debug!(
                        session = %ctx.session,
                        success = status.success,
                        exit_code = ?status.exit_code,
                        message = status.message.as_deref().unwrap_or(""),
                        "Exec: remote status"
                    );
                    exit_code = status.exit_code;
                }
                Decoded::Ignored { channel } => {
                    trace!(session = %ctx.session, ?channel, "Exec: frame ignored");
                }
            },
            Message::Pong(_) => {
                deadline = Instant::now() + idle_timeout;
                trace!(session = %ctx.session, "Exec: pong");
            }
            Message::Close(frame) => {
                let (code, reason) = frame.map_or((1005, String::new()), |f| {
                    (u16::from(f.code), f.reason.as_str().to_string())
                });
                debug!(session = %ctx.session, code, reason = %reason, "Exec: peer sent close");
                break CompletionReason::PeerClosed { code, reason };
            }
            // Pings are answered by the WebSocket layer on the next read/write.
            Message::Ping(_) | Message::Frame(_) => {}
        }
    };

    ctx.coordinator.finish(reason, exit_code).await;
    debug!(session = %ctx.session, "Exec: egress pump stopped");
}
