//! Immutable description of a single exec request.

use serde::{Deserialize, Serialize};

/// Which container the command runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecTarget {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl ExecTarget {
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }
}

/// Which duplex channels the caller wants wired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFlags {
    #[serde(default)]
    pub stdin: bool,
    #[serde(default)]
    pub stdout: bool,
    #[serde(default)]
    pub stderr: bool,
    #[serde(default)]
    pub tty: bool,
}

impl StreamFlags {
    /// Whether any remote output should reach the output sink.
    pub fn wants_output(&self) -> bool {
        self.stdout || self.stderr
    }
}

/// A validated exec request. Read-only for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    target: ExecTarget,
    argv: Vec<String>,
    streams: StreamFlags,
}

impl SessionDescriptor {
    pub fn new(target: ExecTarget, argv: Vec<String>, streams: StreamFlags) -> Self {
        Self {
            target,
            argv,
            streams,
        }
    }

    pub fn target(&self) -> &ExecTarget {
        &self.target
    }

    /// The command and its arguments, in the order they will be executed.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn streams(&self) -> StreamFlags {
        self.streams
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wants_output_when_either_stream_enabled() {
        let mut flags = StreamFlags::default();
        assert!(!flags.wants_output());
        flags.stderr = true;
        assert!(flags.wants_output());
        flags = StreamFlags {
            stdout: true,
            ..StreamFlags::default()
        };
        assert!(flags.wants_output());
    }

    #[test]
    fn descriptor_deserializes_with_missing_flags() {
        let d: SessionDescriptor = serde_json::from_str(
            r#"{
                "target": {"namespace": "default", "pod": "p1", "container": "c1"},
                "argv": ["ls", "-la"],
                "streams": {"stdout": true}
            }"#,
        )
        .unwrap();
        assert_eq!(d.target().pod, "p1");
        assert_eq!(d.argv(), ["ls", "-la"]);
        assert!(d.streams().stdout);
        assert!(!d.streams().stdin);
        assert!(!d.streams().tty);
    }
}
