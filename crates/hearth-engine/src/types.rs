//! Runtime-neutral container, network, image, and log types.

use std::collections::HashMap;
use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;

use crate::error::EngineResult;

// ── Containers ────────────────────────────────────────────────────

/// Everything needed to create a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    /// Command override; `None` keeps the image default.
    pub cmd: Option<Vec<String>>,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub binds: Vec<BindMount>,
    /// Hard memory limit in bytes (0 = unlimited).
    pub memory_bytes: u64,
    /// Relative CPU weight (1024 per core).
    pub cpu_shares: u64,
    pub restart_policy: RestartPolicy,
    /// Network the container is attached to.
    pub network: String,
    pub privileged: bool,
    /// Keep stdin open so console commands can be attached later.
    pub open_stdin: bool,
}

/// Publish `container_port` on `host_port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// A host directory exposed inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
}

impl BindMount {
    /// `host:container` form used by the engine.
    pub fn to_engine_string(&self) -> String {
        format!("{}:{}", self.host_path, self.container_path)
    }

    /// Parse the `host:container[:mode]` form reported by inspect.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, ':');
        let host_path = parts.next()?.to_string();
        let container_path = parts.next()?.to_string();
        Some(Self {
            host_path,
            container_path,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

impl RestartPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Always => "always",
            Self::UnlessStopped => "unless-stopped",
            Self::OnFailure => "on-failure",
        }
    }
}

/// Inspect result, reduced to what the orchestrator acts on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInspect {
    pub id: String,
    /// Name without the engine's leading `/`.
    pub name: String,
    pub image: String,
    pub running: bool,
    /// Engine state string: created, running, exited, ...
    pub status: String,
    pub exit_code: i64,
    pub labels: HashMap<String, String>,
    pub binds: Vec<BindMount>,
}

impl ContainerInspect {
    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).is_some_and(|v| v == value)
    }
}

/// One row of a container listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    /// Engine state string: created, running, exited, ...
    pub state: String,
    pub labels: HashMap<String, String>,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

// ── Networks & images ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    pub driver: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,
    pub repo_tags: Vec<String>,
}

// ── Logs & stdin ──────────────────────────────────────────────────

/// Log retrieval options, passed through to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogOptions {
    /// Only the last N lines; `None` returns everything.
    pub tail: Option<u32>,
    /// Keep the stream open for new output.
    #[serde(default)]
    pub follow: bool,
    /// Unix timestamp lower bound.
    pub since: Option<u64>,
    /// Unix timestamp upper bound.
    pub until: Option<u64>,
    /// Prefix each line with the engine timestamp.
    #[serde(default)]
    pub timestamps: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub source: LogSource,
    pub message: String,
}

/// Stream of decoded log lines.
pub type LogStream = Pin<Box<dyn Stream<Item = EngineResult<LogLine>> + Send>>;

/// Write half of a stdin attach session.
pub type StdinWriter = Pin<Box<dyn AsyncWrite + Send>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_mount_round_trip_with_mode() {
        let bind = BindMount::parse("/var/lib/hearth/gameservers/gs-1:/data:rw").unwrap();
        assert_eq!(bind.host_path, "/var/lib/hearth/gameservers/gs-1");
        assert_eq!(bind.container_path, "/data");
        assert_eq!(bind.to_engine_string(), "/var/lib/hearth/gameservers/gs-1:/data");
        assert!(BindMount::parse("no-colon").is_none());
    }

    #[test]
    fn restart_policy_names() {
        assert_eq!(RestartPolicy::UnlessStopped.as_str(), "unless-stopped");
        let json = serde_json::to_string(&RestartPolicy::UnlessStopped).unwrap();
        assert_eq!(json, "\"unless-stopped\"");
    }
}
