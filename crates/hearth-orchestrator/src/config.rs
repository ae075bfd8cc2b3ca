//! hearth.toml configuration.
//!
//! Every field has a default, so an empty file (or no file) yields a
//! working single-node setup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hearth_placement::PlacementConfig;
use hearth_state::NodeInfo;

use crate::policy::TimeoutPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HearthConfig {
    pub node: NodeConfig,
    pub orchestrator: OrchestratorConfig,
    pub placement: PlacementConfig,
    pub engine: EngineConfig,
    /// Other cluster nodes, registered at boot.
    pub peers: Vec<NodeInfo>,
    pub reconcile_interval_secs: u64,
}

impl Default for HearthConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            placement: PlacementConfig::default(),
            engine: EngineConfig::default(),
            peers: Vec::new(),
            reconcile_interval_secs: 30,
        }
    }
}

impl HearthConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HearthConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

/// Identity of the node this process runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub id: String,
    pub hostname: String,
    /// Address players and peers use to reach this node.
    pub ip: Option<String>,
    pub capacity_memory_bytes: u64,
    pub capacity_cpu_shares: u64,
    pub labels: HashMap<String, String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        Self {
            id: hostname.clone(),
            hostname,
            ip: None,
            capacity_memory_bytes: 0,
            capacity_cpu_shares: 0,
            labels: HashMap::new(),
        }
    }
}

impl NodeConfig {
    /// The node record other nodes read from the store.
    pub fn to_node_info(&self, api_port: u16) -> NodeInfo {
        NodeInfo {
            id: self.id.clone(),
            hostname: self.hostname.clone(),
            address: self.ip.clone().unwrap_or_else(|| self.hostname.clone()),
            api_port,
            capacity_memory_bytes: self.capacity_memory_bytes,
            capacity_cpu_shares: self.capacity_cpu_shares,
            labels: self.labels.clone(),
            draining: false,
            last_seen: hearth_state::epoch_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Bridge network every game server joins.
    pub network_name: String,
    /// Host directory holding `gameservers/<id>` data directories.
    pub data_root: PathBuf,
    /// Where the data directory appears inside the container.
    pub data_mount_target: String,
    /// How long a fresh start must survive before it counts.
    pub start_grace_ms: u64,
    pub stop_timeout_secs: u64,
    /// Log lines captured when a container exits immediately.
    pub log_capture_lines: u32,
    pub pull: TimeoutPolicy,
    pub attach: TimeoutPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            network_name: "hearth-gameservers".to_string(),
            data_root: PathBuf::from("/var/lib/hearth"),
            data_mount_target: "/data".to_string(),
            start_grace_ms: 2000,
            stop_timeout_secs: 30,
            log_capture_lines: 50,
            pull: TimeoutPolicy::pull_default(),
            attach: TimeoutPolicy::attach_default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.start_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path of the container engine's unix socket.
    pub socket: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(hearth_engine::docker::DEFAULT_SOCKET),
        }
    }
}
