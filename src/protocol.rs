//! Frame payload encoding between the relay and the exec endpoint.
//!
//! Two framings are supported:
//!
//! - **raw** — frames carry payload bytes verbatim. Input goes out as binary
//!   frames; text and binary output frames are both forwarded as-is.
//! - **channel** (`v4.channel.k8s.io`) — every frame starts with a channel
//!   byte: `0` stdin, `1` stdout, `2` stderr, `3` status, `4` resize. The
//!   status channel carries a JSON `Status` object once the command exits.

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::{Bytes, Message};

/// Subprotocol requested on the upgrade when [`StreamProtocol::Channel`] is
/// selected.
pub const CHANNEL_SUBPROTOCOL: &str = "v4.channel.k8s.io";

const STDIN_CHANNEL: u8 = 0;
const STDOUT_CHANNEL: u8 = 1;
const STDERR_CHANNEL: u8 = 2;
const STATUS_CHANNEL: u8 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamProtocol {
    #[default]
    Raw,
    Channel,
}

/// A decoded output frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Bytes for the output sink.
    Output(Bytes),
    /// The remote command reported how it ended.
    Status(RemoteStatus),
    /// Nothing to deliver (empty frame or a channel the relay does not use).
    Ignored { channel: Option<u8> },
}

impl StreamProtocol {
    /// Value for `Sec-WebSocket-Protocol`, if this framing needs one.
    pub fn subprotocol(self) -> Option<&'static str> {
        match self {
            Self::Raw => None,
            Self::Channel => Some(CHANNEL_SUBPROTOCOL),
        }
    }

    /// Wrap one chunk of caller input into a frame.
    pub fn encode_input(self, chunk: Bytes) -> Message {
        match self {
            Self::Raw => Message::Binary(chunk),
            Self::Channel => {
                let mut framed = Vec::with_capacity(chunk.len() + 1);
                framed.push(STDIN_CHANNEL);
                framed.extend_from_slice(&chunk);
                Message::Binary(framed.into())
            }
        }
    }

    /// Decode the payload of a text or binary frame.
    pub fn decode_output(self, payload: Bytes) -> Decoded {
        match self {
            Self::Raw if payload.is_empty() => Decoded::Ignored { channel: None },
            Self::Raw => Decoded::Output(payload),
            Self::Channel => {
                let Some(&channel) = payload.first() else {
                    return Decoded::Ignored { channel: None };
                };
                let data = payload.slice(1..);
                match channel {
                    STDOUT_CHANNEL | STDERR_CHANNEL if !data.is_empty() => Decoded::Output(data),
                    STATUS_CHANNEL => Decoded::Status(RemoteStatus::parse(&data)),
                    other => Decoded::Ignored {
                        channel: Some(other),
                    },
                }
            }
        }
    }
}

/// Outcome reported on the status channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct StatusObject {
    #[serde(default)]
    status: String,
    message: Option<String>,
    details: Option<StatusDetails>,
}

#[derive(Deserialize)]
struct StatusDetails {
    #[serde(default)]
    causes: Vec<StatusCause>,
}

#[derive(Deserialize)]
struct StatusCause {
    reason: Option<String>,
    message: Option<String>,
}

impl RemoteStatus {
    /// Parse a `Status` object. Unparseable payloads count as a failure
    /// with the raw text as message.
    pub fn parse(payload: &[u8]) -> Self {
        let Ok(status) = serde_json::from_slice::<StatusObject>(payload) else {
            return Self {
                success: false,
                exit_code: None,
                message: Some(String::from_utf8_lossy(payload).into_owned()),
            };
        };

        if status.status == "Success" {
            return Self {
                success: true,
                exit_code: Some(0),
                message: status.message,
            };
        }

        let exit_code = status
            .details
            .iter()
            .flat_map(|d| d.causes.iter())
            .find(|c| c.reason.as_deref() == Some("ExitCode"))
            .and_then(|c| c.message.as_deref())
            .and_then(|m| m.trim().parse().ok());

        Self {
            success: false,
            exit_code,
            message: status.message,
        }
    }
}
