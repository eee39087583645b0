//! Transport dialer: authenticated WebSocket upgrade to the exec endpoint.

use std::fmt;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::endpoint::ExecEndpoint;
use crate::error::RelayError;
use crate::protocol::StreamProtocol;
use crate::state::ConnectionState;

/// A dialed exec connection.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// TLS settings applied to `wss` endpoints. Where these come from is the
/// caller's business.
#[derive(Clone, Default)]
pub struct TlsPolicy {
    /// Extra PEM-encoded root certificate(s), typically the cluster CA.
    pub ca_pem: Option<Vec<u8>>,
    /// Skip certificate and hostname verification.
    pub insecure_skip_verify: bool,
}

impl TlsPolicy {
    fn connector(&self) -> Result<native_tls::TlsConnector, native_tls::Error> {
        let mut builder = native_tls::TlsConnector::builder();
        if let Some(pem) = &self.ca_pem {
            builder.add_root_certificate(native_tls::Certificate::from_pem(pem)?);
        }
        if self.insecure_skip_verify {
            builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        builder.build()
    }
}

impl fmt::Debug for TlsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsPolicy")
            .field("ca_pem", &self.ca_pem.as_ref().map(Vec::len))
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

/// Bearer token plus TLS policy for one cluster.
#[derive(Clone)]
pub struct Credentials {
    pub bearer_token: String,
    pub tls: TlsPolicy,
}

impl Credentials {
    pub fn new(bearer_token: impl Into<String>, tls: TlsPolicy) -> Self {
        Self {
            bearer_token: bearer_token.into(),
            tls,
        }
    }

    pub(crate) fn authorization(&self) -> String {
        format!("Bearer {}", self.bearer_token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("bearer_token", &"<redacted>")
            .field("tls", &self.tls)
            .finish()
    }
}

/// Open the WebSocket to `endpoint`.
///
/// The upgrade request carries `Authorization: Bearer <token>` and, for the
/// channel protocol, `Sec-WebSocket-Protocol`. Every failure (TLS setup,
/// network, non-101 response, timeout) is a [`RelayError::Dial`] and leaves
/// nothing running.
pub async fn dial(
    endpoint: &ExecEndpoint,
    credentials: &Credentials,
    protocol: StreamProtocol,
    connect_timeout: Duration,
) -> Result<(WsStream, ConnectionState), RelayError> {
    let target = endpoint.as_str();

    let mut request = target
        .into_client_request()
        .map_err(|e| RelayError::dial(target, e))?;
    let bearer = HeaderValue::from_str(&credentials.authorization())
        .map_err(|e| RelayError::dial(target, format!("invalid bearer token: {e}")))?;
    request.headers_mut().insert(header::AUTHORIZATION, bearer);
    if let Some(subprotocol) = protocol.subprotocol() {
        request.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(subprotocol),
        );
    }

    let connector = if endpoint.is_secure() {
        let tls = credentials
            .tls
            .connector()
            .map_err(|e| RelayError::dial(target, e))?;
        Some(Connector::NativeTls(tls))
    } else {
        None
    };

    let handshake =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector);
    let (ws, response) = match tokio::time::timeout(connect_timeout, handshake).await {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return Err(RelayError::dial(target, e)),
        Err(_) => {
            return Err(RelayError::dial(
                target,
                format!("handshake timed out after {connect_timeout:?}"),
            ))
        }
    };

    debug!(status = %response.status(), "Exec: upgrade complete");
    Ok((ws, ConnectionState::connected()))
}
