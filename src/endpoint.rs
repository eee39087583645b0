//! Endpoint resolution: cluster host + [`SessionDescriptor`] → exec URL.
//!
//! The exec endpoint lives at
//! `{host}/api/v1/namespaces/{namespace}/pods/{pod}/exec` and takes the
//! command as one `command` query parameter per argv element:
//!
//! ```text
//! wss://10.0.0.1:6443/api/v1/namespaces/default/pods/p1/exec
//!     ?container=c1&command=%2Fbin%2Fsh&command=-c&command=echo+hi
//!     &stdin=false&stdout=true&stderr=true&tty=false
//! ```

use std::fmt;

use url::Url;

use crate::error::RelayError;
use crate::session::SessionDescriptor;

/// A validated cluster API server address.
///
/// Holds the REST base (`http`/`https`) and the streaming base (`ws`/`wss`)
/// derived from the same host, so both the exec relay and the container
/// lister resolve against identical paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEndpoint {
    rest_base: Url,
    stream_base: Url,
}

impl ClusterEndpoint {
    /// Parse a cluster host such as `https://10.0.0.1:6443`.
    ///
    /// `https`/`http` are rewritten to `wss`/`ws` for streaming; `wss`/`ws`
    /// are accepted and mapped back for REST. A host without a scheme is
    /// treated as `https`. Any path prefix on the host is kept.
    pub fn parse(host: &str) -> Result<Self, RelayError> {
        let trimmed = host.trim();
        if trimmed.is_empty() {
            return Err(RelayError::resolve(host, "host is empty"));
        }
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        let mut parsed =
            Url::parse(&with_scheme).map_err(|e| RelayError::resolve(host, e.to_string()))?;
        if parsed.host_str().is_none() {
            return Err(RelayError::resolve(host, "missing host"));
        }
        let (rest_scheme, stream_scheme) = match parsed.scheme() {
            "https" | "wss" => ("https", "wss"),
            "http" | "ws" => ("http", "ws"),
            other => {
                return Err(RelayError::resolve(
                    host,
                    format!("unsupported scheme {other:?}"),
                ))
            }
        };
        parsed.set_query(None);
        parsed.set_fragment(None);

        let mut rest_base = parsed.clone();
        rest_base
            .set_scheme(rest_scheme)
            .map_err(|()| RelayError::resolve(host, "cannot use scheme for REST"))?;
        let mut stream_base = parsed;
        stream_base
            .set_scheme(stream_scheme)
            .map_err(|()| RelayError::resolve(host, "cannot use scheme for streaming"))?;

        Ok(Self {
            rest_base,
            stream_base,
        })
    }

    /// REST URL for `segments` below the base path.
    pub fn rest_url<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, RelayError> {
        join_segments(&self.rest_base, segments)
    }

    /// Resolve the exec WebSocket URL for `descriptor`.
    pub fn resolve(&self, descriptor: &SessionDescriptor) -> Result<ExecEndpoint, RelayError> {
        let target = descriptor.target();
        let mut url = join_segments(
            &self.stream_base,
            [
                "api",
                "v1",
                "namespaces",
                target.namespace.as_str(),
                "pods",
                target.pod.as_str(),
                "exec",
            ],
        )?;

        let streams = descriptor.streams();
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.append_pair("container", &target.container);
            for arg in descriptor.argv() {
                query.append_pair("command", arg);
            }
            query
                .append_pair("stdin", bool_str(streams.stdin))
                .append_pair("stdout", bool_str(streams.stdout))
                .append_pair("stderr", bool_str(streams.stderr))
                .append_pair("tty", bool_str(streams.tty));
        }

        Ok(ExecEndpoint { url })
    }
}

fn join_segments<'a>(
    base: &Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, RelayError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| RelayError::resolve(base.as_str(), "host cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// A fully resolved exec target, ready to dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecEndpoint {
    url: Url,
}

impl ExecEndpoint {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// `true` when the endpoint requires TLS.
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

impl fmt::Display for ExecEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ExecTarget, StreamFlags};

    fn descriptor(argv: &[&str], streams: StreamFlags) -> SessionDescriptor {
        SessionDescriptor::new(
            ExecTarget::new("default", "p1", "c1"),
            argv.iter().map(ToString::to_string).collect(),
            streams,
        )
    }

    fn output_only() -> StreamFlags {
        StreamFlags {
            stdin: false,
            stdout: true,
            stderr: true,
            tty: false,
        }
    }

    #[test]
    fn resolves_shell_command_scenario() {
        let cluster = ClusterEndpoint::parse("https://10.0.0.1:6443").unwrap();
        let endpoint = cluster
            .resolve(&descriptor(&["/bin/sh", "-c", "echo hi"], output_only()))
            .unwrap();

        assert_eq!(endpoint.url().scheme(), "wss");
        assert_eq!(
            endpoint.url().path(),
            "/api/v1/namespaces/default/pods/p1/exec"
        );
        assert_eq!(
            endpoint.url().query(),
            Some(
                "container=c1&command=%2Fbin%2Fsh&command=-c&command=echo+hi\
                 &stdin=false&stdout=true&stderr=true&tty=false"
            )
        );
        assert!(endpoint.is_secure());
    }

    #[test]
    fn argv_round_trips_through_query() {
        let argv = [
            "python3",
            "-c",
            "print('a & b = c?')",
            "100%",
            "",
            "späce / slash+plus",
            "#hash",
        ];
        let cluster = ClusterEndpoint::parse("https://k8s.example.com").unwrap();
        let endpoint = cluster
            .resolve(&descriptor(&argv, StreamFlags::default()))
            .unwrap();

        let decoded: Vec<String> = endpoint
            .url()
            .query_pairs()
            .filter(|(k, _)| k == "command")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(decoded, argv);
    }

    #[test]
    fn empty_argv_has_no_command_params() {
        let cluster = ClusterEndpoint::parse("http://localhost:8080").unwrap();
        let endpoint = cluster
            .resolve(&descriptor(&[], StreamFlags::default()))
            .unwrap();
        assert_eq!(endpoint.url().scheme(), "ws");
        assert_eq!(
            endpoint.url().query(),
            Some("container=c1&stdin=false&stdout=false&stderr=false&tty=false")
        );
        assert!(!endpoint.is_secure());
    }

    #[test]
    fn flags_render_as_literals() {
        let cluster = ClusterEndpoint::parse("https://k8s").unwrap();
        let streams = StreamFlags {
            stdin: true,
            stdout: true,
            stderr: false,
            tty: true,
        };
        let endpoint = cluster.resolve(&descriptor(&["bash"], streams)).unwrap();
        let query = endpoint.url().query().unwrap();
        assert!(query.ends_with("stdin=true&stdout=true&stderr=false&tty=true"));
    }

    #[test]
    fn keeps_base_path_without_double_slash() {
        let cluster = ClusterEndpoint::parse("https://gateway.example.com/k8s/clusters/c-1/").unwrap();
        let endpoint = cluster
            .resolve(&descriptor(&["ls"], StreamFlags::default()))
            .unwrap();
        assert_eq!(
            endpoint.url().path(),
            "/k8s/clusters/c-1/api/v1/namespaces/default/pods/p1/exec"
        );
    }

    #[test]
    fn host_without_scheme_defaults_to_tls() {
        let cluster = ClusterEndpoint::parse("10.0.0.1:6443").unwrap();
        let endpoint = cluster
            .resolve(&descriptor(&["ls"], StreamFlags::default()))
            .unwrap();
        assert!(endpoint.as_str().starts_with("wss://10.0.0.1:6443/api/v1/"));
    }

    #[test]
    fn websocket_schemes_map_back_to_rest() {
        let cluster = ClusterEndpoint::parse("wss://k8s.local").unwrap();
        let url = cluster.rest_url(["api", "v1", "namespaces"]).unwrap();
        assert_eq!(url.as_str(), "https://k8s.local/api/v1/namespaces");

        let cluster = ClusterEndpoint::parse("ws://k8s.local:8001").unwrap();
        let url = cluster.rest_url(["api"]).unwrap();
        assert_eq!(url.as_str(), "http://k8s.local:8001/api");
    }

    #[test]
    fn rejects_malformed_hosts() {
        for host in ["", "   ", "https://", "ftp://k8s.local", "http://[::1"] {
            let err = ClusterEndpoint::parse(host).unwrap_err();
            assert!(err.is_resolve(), "{host:?} should fail to resolve");
        }
    }

    #[test]
    fn drops_query_and_fragment_from_host() {
        let cluster = ClusterEndpoint::parse("https://k8s.local/?x=1#frag").unwrap();
        let endpoint = cluster
            .resolve(&descriptor(&["ls"], StreamFlags::default()))
            .unwrap();
        assert!(endpoint.url().fragment().is_none());
        assert!(endpoint.url().query().unwrap().starts_with("container=c1&"));
    }
}
