#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

//! exec-relay — bridges a caller's byte streams to a command running inside a
//! Kubernetes container over the API server's exec WebSocket.
//!
//! Building blocks:
//! - `endpoint` — cluster base URL to exec WebSocket URL
//! - `dialer` — authenticated WebSocket upgrade
//! - `relay` — ingress/egress pumps, close coordination, session handle
//! - `protocol` — raw and `v4.channel.k8s.io` frame payloads
//! - `sink` — output and completion sinks supplied by the caller
//! - `containers` — pod container listing over the REST API
//! - `config` — TOML + env configuration
//!
//! ```text
//! ClusterEndpoint::resolve ─▶ dialer::dial ─▶ spawn_session
//!                                              ├─ ingress: input ─▶ ws (+ pings)
//!                                              ├─ egress:  ws ─▶ OutputSink
//!                                              └─ CloseCoordinator ─▶ CompletionSink (once)
//! ```

pub mod config;
pub mod containers;
pub mod dialer;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod sink;
pub mod state;

pub use dialer::{Credentials, TlsPolicy};
pub use endpoint::{ClusterEndpoint, ExecEndpoint};
pub use error::{InputError, RelayError};
pub use protocol::StreamProtocol;
pub use relay::{spawn_session, ExecRelay, RelaySettings, SessionHandle, Sinks};
pub use session::{ExecTarget, SessionDescriptor, StreamFlags};
pub use sink::{Completion, CompletionReason, CompletionSink, OutputSink, SinkError};
pub use state::ConnectionState;
