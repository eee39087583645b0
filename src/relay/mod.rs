//! Exec relay: session start-up and the session handle.
//!
//! ## Session lifecycle
//!
//! 1. [`ExecRelay::exec`] resolves the exec URL and dials it. Resolution and
//!    dial failures are returned directly; nothing is spawned.
//! 2. The WebSocket is split. The writer half goes behind a mutex shared by
//!    the ingress pump and the close coordinator; the reader half belongs to
//!    the egress pump.
//! 3. Both pumps run until the shared [`ConnectionState`] closes. The first
//!    termination trigger (peer close, read error, idle timeout, write
//!    failure, cancellation) wins the coordinator, which fires the completion
//!    sink once and releases the connection.
//!
//! Dropping the [`SessionHandle`] (with every clone of its input sender)
//! closes the input channel, which sends a graceful close to the peer.

mod coordinator;
mod egress;
mod ingress;

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::dialer::{self, Credentials};
use crate::endpoint::{ClusterEndpoint, ExecEndpoint};
use crate::error::{InputError, RelayError};
use crate::protocol::StreamProtocol;
use crate::session::SessionDescriptor;
use crate::sink::{CompletionSink, OutputSink};
use crate::state::ConnectionState;
use coordinator::CloseCoordinator;

/// Idle window after which a silent peer is considered gone (60 s).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Deadline for every single frame write (10 s).
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for the WebSocket upgrade (30 s).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Inbound chunks buffered between the caller and the ingress pump.
pub const DEFAULT_INPUT_BUFFER: usize = 64;
/// Bounds the idle window is clamped to before any timer is armed.
pub const MIN_IDLE_TIMEOUT: Duration = Duration::from_millis(10);
pub const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Writer half of a session's WebSocket, shared by the ingress pump and the
/// close coordinator.
pub(crate) type WsSink<S> = Arc<Mutex<SplitSink<WebSocketStream<S>, Message>>>;

/// Timing and framing knobs for every session a relay starts.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub idle_timeout: Duration,
    pub write_timeout: Duration,
    pub connect_timeout: Duration,
    pub input_buffer: usize,
    pub protocol: StreamProtocol,
}

impl RelaySettings {
    /// `idle_timeout` clamped to [`MIN_IDLE_TIMEOUT`, `MAX_IDLE_TIMEOUT`].
    pub fn idle_window(&self) -> Duration {
        self.idle_timeout.clamp(MIN_IDLE_TIMEOUT, MAX_IDLE_TIMEOUT)
    }

    /// Pings go out at 9/10 of the idle window so a pong can land in time.
    /// Never zero.
    pub fn probe_interval(&self) -> Duration {
        let window = self.idle_window();
        window - window / 10
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            input_buffer: DEFAULT_INPUT_BUFFER,
            protocol: StreamProtocol::Raw,
        }
    }
}

/// The output/completion pair a session reports into.
#[derive(Clone)]
pub struct Sinks {
    pub output: Arc<dyn OutputSink>,
    pub completion: Arc<dyn CompletionSink>,
}

impl Sinks {
    pub fn new(output: impl OutputSink + 'static, completion: impl CompletionSink + 'static) -> Self {
        Self {
            output: Arc::new(output),
            completion: Arc::new(completion),
        }
    }
}

/// Starts exec sessions against one cluster.
#[derive(Debug, Clone)]
pub struct ExecRelay {
    cluster: ClusterEndpoint,
    credentials: Credentials,
    settings: RelaySettings,
}

impl ExecRelay {
    pub fn new(cluster: ClusterEndpoint, credentials: Credentials, settings: RelaySettings) -> Self {
        Self {
            cluster,
            credentials,
            settings,
        }
    }

    pub fn cluster(&self) -> &ClusterEndpoint {
        &self.cluster
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn resolve(&self, descriptor: &SessionDescriptor) -> Result<ExecEndpoint, RelayError> {
        self.cluster.resolve(descriptor)
    }

    /// Resolve, dial and start relaying. Returns once the upgrade has
    /// completed; the session then runs in the background.
    pub async fn exec(
        &self,
        descriptor: SessionDescriptor,
        sinks: Sinks,
    ) -> Result<SessionHandle, RelayError> {
        let endpoint = self.resolve(&descriptor)?;
        let target = descriptor.target();
        info!(
            namespace = %target.namespace,
            pod = %target.pod,
            container = %target.container,
            argc = descriptor.argv().len(),
            "Exec: dialing {}",
            endpoint.url().path()
        );

        let (ws, state) = dialer::dial(
            &endpoint,
            &self.credentials,
            self.settings.protocol,
            self.settings.connect_timeout,
        )
        .await?;

        Ok(spawn_session(ws, state, descriptor, sinks, &self.settings))
    }
}

/// State every pump shares.
pub(crate) struct PumpContext<S> {
    pub(crate) session: Uuid,
    pub(crate) state: ConnectionState,
    pub(crate) coordinator: Arc<CloseCoordinator<S>>,
    pub(crate) settings: RelaySettings,
}

impl<S> Clone for PumpContext<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session,
            state: self.state.clone(),
            coordinator: Arc::clone(&self.coordinator),
            settings: self.settings.clone(),
        }
    }
}

/// Start both pumps over an already-upgraded WebSocket.
///
/// Works over any transport, which is what [`ExecRelay::exec`] and the tests
/// build on.
pub fn spawn_session<S>(
    ws: WebSocketStream<S>,
    state: ConnectionState,
    descriptor: SessionDescriptor,
    sinks: Sinks,
    settings: &RelaySettings,
) -> SessionHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session = Uuid::new_v4();
    let descriptor = Arc::new(descriptor);
    let streams = descriptor.streams();

    let (sink, stream) = ws.split();
    let sink: WsSink<S> = Arc::new(Mutex::new(sink));
    let finished = CancellationToken::new();
    let cancel = CancellationToken::new();

    let coordinator = Arc::new(CloseCoordinator::new(
        session,
        state.clone(),
        Arc::clone(&sink),
        sinks.completion,
        settings.write_timeout,
        finished.clone(),
    ));
    let ctx = PumpContext {
        session,
        state: state.clone(),
        coordinator,
        settings: settings.clone(),
    };

    let (input_tx, input_rx) = if streams.stdin {
        let (tx, rx) = mpsc::channel(settings.input_buffer.max(1));
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    tokio::spawn(ingress::run(ctx.clone(), sink, input_rx, cancel.clone()));
    tokio::spawn(egress::run(
        ctx,
        stream,
        sinks.output,
        streams.wants_output(),
    ));

    let target = descriptor.target();
    info!(
        session = %session,
        namespace = %target.namespace,
        pod = %target.pod,
        container = %target.container,
        stdin = streams.stdin,
        stdout = streams.stdout,
        stderr = streams.stderr,
        tty = streams.tty,
        "Exec: session started"
    );

    SessionHandle {
        id: session,
        descriptor,
        input: input_tx,
        state,
        cancel,
        finished,
    }
}

/// Caller-side handle of a running session.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    descriptor: Arc<SessionDescriptor>,
    input: Option<mpsc::Sender<Bytes>>,
    state: ConnectionState,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl SessionHandle {
    /// Session id used in log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn descriptor(&self) -> &SessionDescriptor {
        &self.descriptor
    }

    /// Producer side of the input channel; `None` without stdin.
    pub fn input(&self) -> Option<&mpsc::Sender<Bytes>> {
        self.input.as_ref()
    }

    /// Take ownership of the input producer. Dropping it (and every clone)
    /// requests a graceful close.
    pub fn take_input(&mut self) -> Option<mpsc::Sender<Bytes>> {
        self.input.take()
    }

    /// Queue one chunk of input for the remote command.
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<(), InputError> {
        let tx = self.input.as_ref().ok_or(InputError::Disabled)?;
        tx.send(data.into()).await.map_err(|_| InputError::Closed)
    }

    /// Drop this handle's input producer.
    pub fn close_input(&mut self) {
        self.input = None;
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Abort the session: sends a close frame and completes with
    /// [`CompletionReason::Cancelled`](crate::sink::CompletionReason::Cancelled).
    /// Works whether or not the session has stdin.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves after the completion sink has fired and the connection has
    /// been released.
    pub async fn closed(&self) {
        self.finished.cancelled().await;
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }
}
