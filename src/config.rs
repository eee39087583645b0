//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `EXEC_RELAY_HOST`, `EXEC_RELAY_TOKEN`,
//!    `EXEC_RELAY_LOG`
//! 2. **Config file** — path via `--config <path>`, or `exec-relay.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [cluster]
//! host = "https://10.0.0.1:6443"
//! token_file = "/var/run/secrets/kubernetes.io/serviceaccount/token"
//! ca_file = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt"
//! insecure_skip_tls_verify = false
//!
//! [relay]
//! idle_timeout_secs = 60
//! write_timeout_secs = 10
//! connect_timeout_secs = 30
//! input_buffer = 64
//! protocol = "raw"            # or "channel" for v4.channel.k8s.io framing
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::dialer::{Credentials, TlsPolicy};
use crate::endpoint::ClusterEndpoint;
use crate::error::RelayError;
use crate::protocol::StreamProtocol;
use crate::relay::{ExecRelay, RelaySettings};

/// Looked up in the current directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "exec-relay.toml";

/// Upper bound for every `*_secs` relay setting (one day).
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no cluster host configured (set cluster.host or EXEC_RELAY_HOST)")]
    MissingHost,

    #[error("invalid relay.{field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Endpoint(#[from] RelayError),
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// API server address and credentials.
#[derive(Clone, Default, Deserialize)]
pub struct ClusterConfig {
    /// Base URL of the API server. Override with `EXEC_RELAY_HOST`.
    pub host: Option<String>,
    /// Bearer token. Override with `EXEC_RELAY_TOKEN`. Takes precedence over
    /// `token_file`.
    pub token: Option<String>,
    /// File holding the bearer token (e.g. a service account token).
    pub token_file: Option<PathBuf>,
    /// PEM bundle trusted in addition to the system roots.
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

impl std::fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("host", &self.host)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("token_file", &self.token_file)
            .field("ca_file", &self.ca_file)
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .finish()
    }
}

/// Session timing and framing.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Seconds without a pong before the peer is considered gone (default 60).
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Per-frame write deadline in seconds (default 10).
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    /// WebSocket upgrade deadline in seconds (default 30).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Input chunks buffered ahead of the connection (default 64).
    #[serde(default = "default_input_buffer")]
    pub input_buffer: usize,
    #[serde(default)]
    pub protocol: StreamProtocol,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_idle_timeout() -> u64 {
    60
}
fn default_write_timeout() -> u64 {
    10
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_input_buffer() -> usize {
    64
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            write_timeout_secs: default_write_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            input_buffer: default_input_buffer(),
            protocol: StreamProtocol::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file. Otherwise looks for
    /// `exec-relay.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(Path::new(p))?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Env var overrides, read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("EXEC_RELAY_HOST") {
            self.cluster.host = Some(host);
        }
        if let Some(token) = lookup("EXEC_RELAY_TOKEN") {
            self.cluster.token = Some(token);
        }
        if let Some(level) = lookup("EXEC_RELAY_LOG") {
            self.logging.level = level;
        }
    }

    pub fn cluster_endpoint(&self) -> Result<ClusterEndpoint, ConfigError> {
        let host = self.cluster.host.as_deref().ok_or(ConfigError::MissingHost)?;
        Ok(ClusterEndpoint::parse(host)?)
    }

    /// Bearer token and TLS policy, reading `token_file` and `ca_file` as
    /// needed. A missing token yields an empty one.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let token = match (&self.cluster.token, &self.cluster.token_file) {
            (Some(token), _) => token.clone(),
            (None, Some(file)) => read(file)?.trim().to_string(),
            (None, None) => String::new(),
        };
        let ca_pem = match &self.cluster.ca_file {
            Some(file) => Some(read(file)?.into_bytes()),
            None => None,
        };
        Ok(Credentials::new(
            token,
            TlsPolicy {
                ca_pem,
                insecure_skip_verify: self.cluster.insecure_skip_tls_verify,
            },
        ))
    }

    /// Relay timings, each required to be in `1..=MAX_TIMEOUT_SECS`.
    pub fn relay_settings(&self) -> Result<RelaySettings, ConfigError> {
        let relay = &self.relay;
        if relay.input_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "input_buffer",
                reason: "must be at least 1".into(),
            });
        }
        Ok(RelaySettings {
            idle_timeout: seconds("idle_timeout_secs", relay.idle_timeout_secs)?,
            write_timeout: seconds("write_timeout_secs", relay.write_timeout_secs)?,
            connect_timeout: seconds("connect_timeout_secs", relay.connect_timeout_secs)?,
            input_buffer: relay.input_buffer,
            protocol: relay.protocol,
        })
    }

    pub fn build_relay(&self) -> Result<ExecRelay, ConfigError> {
        Ok(ExecRelay::new(
            self.cluster_endpoint()?,
            self.credentials()?,
            self.relay_settings()?,
        ))
    }
}

fn seconds(field: &'static str, value: u64) -> Result<Duration, ConfigError> {
    if (1..=MAX_TIMEOUT_SECS).contains(&value) {
        Ok(Duration::from_secs(value))
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{value} is outside 1..={MAX_TIMEOUT_SECS} seconds"),
        })
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_relay_constants() {
        let config = Config::default();
        let settings = config.relay_settings().unwrap();
        let defaults = RelaySettings::default();
        assert_eq!(settings.idle_timeout, defaults.idle_timeout);
        assert_eq!(settings.write_timeout, defaults.write_timeout);
        assert_eq!(settings.connect_timeout, defaults.connect_timeout);
        assert_eq!(settings.input_buffer, defaults.input_buffer);
        assert_eq!(settings.protocol, StreamProtocol::Raw);
        assert_eq!(config.logging.level, "info");
        assert!(matches!(
            config.cluster_endpoint(),
            Err(ConfigError::MissingHost)
        ));
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [cluster]
            host = "https://10.0.0.1:6443"
            token = "abc"
            insecure_skip_tls_verify = true

            [relay]
            idle_timeout_secs = 5
            protocol = "channel"
            "#,
        )
        .unwrap();

        assert_eq!(config.relay.idle_timeout_secs, 5);
        assert_eq!(config.relay.write_timeout_secs, 10);
        assert_eq!(config.relay.protocol, StreamProtocol::Channel);
        assert_eq!(config.logging.level, "info");

        let creds = config.credentials().unwrap();
        assert_eq!(creds.bearer_token, "abc");
        assert!(creds.tls.insecure_skip_verify);
        assert!(creds.tls.ca_pem.is_none());

        let relay = config.build_relay().unwrap();
        assert_eq!(relay.settings().probe_interval(), Duration::from_millis(4500));
    }

    #[test]
    fn unknown_protocol_is_a_parse_error() {
        let err = toml::from_str::<Config>("[relay]\nprotocol = \"spdy\"\n").unwrap_err();
        assert!(err.to_string().contains("spdy"));
    }

    #[test]
    fn env_overrides_win() {
        let mut config: Config = toml::from_str(
            r#"
            [cluster]
            host = "https://file.example:6443"
            token = "from-file"
            "#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            ("EXEC_RELAY_HOST", "https://env.example:6443"),
            ("EXEC_RELAY_TOKEN", "from-env"),
            ("EXEC_RELAY_LOG", "debug"),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|k| env.get(k).map(ToString::to_string));

        assert_eq!(config.cluster.host.as_deref(), Some("https://env.example:6443"));
        assert_eq!(config.credentials().unwrap().bearer_token, "from-env");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn token_and_ca_files_are_read() {
        let dir = std::env::temp_dir().join(format!("exec-relay-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let token_file = dir.join("token");
        let ca_file = dir.join("ca.crt");
        std::fs::write(&token_file, "sa-token\n").unwrap();
        std::fs::write(&ca_file, "-----BEGIN CERTIFICATE-----\n").unwrap();

        let config = Config {
            cluster: ClusterConfig {
                host: Some("https://10.0.0.1".into()),
                token_file: Some(token_file),
                ca_file: Some(ca_file),
                ..ClusterConfig::default()
            },
            ..Config::default()
        };
        let creds = config.credentials().unwrap();
        assert_eq!(creds.bearer_token, "sa-token");
        assert_eq!(
            creds.tls.ca_pem.as_deref(),
            Some(&b"-----BEGIN CERTIFICATE-----\n"[..])
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_files_are_reported() {
        let config = Config {
            cluster: ClusterConfig {
                token_file: Some(PathBuf::from("/nonexistent/exec-relay/token")),
                ..ClusterConfig::default()
            },
            ..Config::default()
        };
        let err = config.credentials().unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/exec-relay/token"));

        let err = Config::load(Some("/nonexistent/exec-relay.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn invalid_host_surfaces_endpoint_error() {
        let config = Config {
            cluster: ClusterConfig {
                host: Some("ftp://cluster".into()),
                ..ClusterConfig::default()
            },
            ..Config::default()
        };
        assert!(matches!(
            config.cluster_endpoint(),
            Err(ConfigError::Endpoint(e)) if e.is_resolve()
        ));
    }

    #[test]
    fn out_of_range_timeouts_are_rejected() {
        let config: Config = toml::from_str("[relay]\nidle_timeout_secs = 0\n").unwrap();
        let err = config.relay_settings().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "idle_timeout_secs",
                ..
            }
        ));

        let config: Config =
            toml::from_str("[cluster]\nhost = \"https://10.0.0.1\"\n[relay]\nidle_timeout_secs = 4611686018427387904\n")
                .unwrap();
        assert!(matches!(
            config.build_relay(),
            Err(ConfigError::Invalid {
                field: "idle_timeout_secs",
                ..
            })
        ));

        let config: Config = toml::from_str("[relay]\nwrite_timeout_secs = 86401\n").unwrap();
        assert!(config
            .relay_settings()
            .unwrap_err()
            .to_string()
            .contains("write_timeout_secs"));

        let config: Config = toml::from_str("[relay]\ninput_buffer = 0\n").unwrap();
        assert!(matches!(
            config.relay_settings(),
            Err(ConfigError::Invalid {
                field: "input_buffer",
                ..
            })
        ));

        let config: Config = toml::from_str("[relay]\nidle_timeout_secs = 86400\n").unwrap();
        assert_eq!(
            config.relay_settings().unwrap().idle_timeout,
            Duration::from_secs(MAX_TIMEOUT_SECS)
        );
    }
}
