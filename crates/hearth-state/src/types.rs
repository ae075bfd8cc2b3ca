//! Domain types for the Hearth state store.
//!
//! These types represent the persisted state of game servers, their
//! placement rows, and cluster nodes. All types are serializable to/from
//! JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::StateError;

/// Unique identifier for a game server.
pub type GameServerId = String;

/// Identifier assigned by the container engine.
pub type ContainerId = String;

/// Unique identifier for a node in the cluster.
pub type NodeId = String;

// ── Game server ───────────────────────────────────────────────────

/// A game-server workload: the requested spec plus what the orchestrator
/// last observed about its container.
///
/// A recorded `container_id` is a hint, not a guarantee: the container may
/// have been removed out-of-band since it was written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameServer {
    pub id: GameServerId,
    /// Image reference, e.g. `itzg/minecraft-server:latest`.
    pub image: String,
    /// Port published on the host and inside the container.
    pub port: u16,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    /// Hard memory limit in bytes (0 = unlimited).
    pub memory_bytes: u64,
    /// CPU allocation in cores, converted to engine CPU shares.
    pub cpu_cores: f64,
    /// Overrides the image's default command when set.
    #[serde(default)]
    pub start_command: Option<String>,
    #[serde(default)]
    pub container_id: Option<ContainerId>,
    #[serde(default)]
    pub container_name: Option<String>,
    pub status: GameServerStatus,
    /// Unix timestamp of the last successful start.
    #[serde(default)]
    pub last_started_at: Option<u64>,
    /// Unix timestamp (seconds) when this record was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when this record was last updated.
    pub updated_at: u64,
}

impl GameServer {
    /// Build a fresh record in the `Provisioning` state, as the owning layer
    /// would before handing it to the orchestrator.
    pub fn new(
        id: impl Into<String>,
        image: impl Into<String>,
        port: u16,
        memory_bytes: u64,
        cpu_cores: f64,
    ) -> Self {
        let now = epoch_secs();
        Self {
            id: id.into(),
            image: image.into(),
            port,
            env_vars: HashMap::new(),
            memory_bytes,
            cpu_cores,
            start_command: None,
            container_id: None,
            container_name: None,
            status: GameServerStatus::Provisioning,
            last_started_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle status of a game server.
///
/// Persisted as its numeric code so records written by older control planes
/// keep their meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum GameServerStatus {
    /// Container exists but has not been started.
    Created,
    /// Record accepted by the owning layer, no container yet.
    Provisioning,
    Starting,
    Running,
    /// Graceful stop in progress.
    Stopping,
    Stopped,
    /// Teardown in progress.
    Deleting,
    /// Could not be started; no further automatic recovery.
    Failed,
}

impl GameServerStatus {
    pub const fn code(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Provisioning => 1,
            Self::Starting => 2,
            Self::Running => 3,
            Self::Stopping => 4,
            Self::Stopped => 5,
            Self::Deleting => 6,
            Self::Failed => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Provisioning => "provisioning",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Deleting => "deleting",
            Self::Failed => "failed",
        }
    }
}

impl From<GameServerStatus> for u8 {
    fn from(status: GameServerStatus) -> u8 {
        status.code()
    }
}

impl TryFrom<u8> for GameServerStatus {
    type Error = StateError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Self::Created,
            1 => Self::Provisioning,
            2 => Self::Starting,
            3 => Self::Running,
            4 => Self::Stopping,
            5 => Self::Stopped,
            6 => Self::Deleting,
            7 => Self::Failed,
            other => return Err(StateError::UnknownStatus(other)),
        })
    }
}

impl fmt::Display for GameServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Location ──────────────────────────────────────────────────────

/// Where a game server's container lives. One row per container.
///
/// Routing consumers must only treat `Running` rows as authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameServerLocation {
    pub id: String,
    pub game_server_id: GameServerId,
    pub node_id: NodeId,
    pub node_hostname: String,
    #[serde(default)]
    pub node_ip: Option<String>,
    pub container_id: ContainerId,
    pub status: LocationStatus,
    pub port: u16,
    pub created_at: u64,
    pub updated_at: u64,
}

impl GameServerLocation {
    /// Derive the row ID from its container ID.
    pub fn id_for(container_id: &str) -> String {
        let short: String = container_id.chars().take(12).collect();
        format!("loc-{short}")
    }
}

/// Mirror of the live container state, as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationStatus {
    Created,
    Starting,
    Running,
    Stopped,
    Failed,
}

impl LocationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// Information about a node in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub hostname: String,
    /// Address other nodes and players use to reach this node.
    pub address: String,
    /// Port of the node API used for forwarded lifecycle calls.
    pub api_port: u16,
    /// Total memory available for game servers (bytes).
    pub capacity_memory_bytes: u64,
    /// Total CPU shares available (1024 per core).
    pub capacity_cpu_shares: u64,
    /// Arbitrary labels for scheduling affinity.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Draining nodes accept no new placements.
    #[serde(default)]
    pub draining: bool,
    /// Unix timestamp of the last time this node was seen.
    #[serde(default)]
    pub last_seen: u64,
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        let all = [
            (GameServerStatus::Created, 0),
            (GameServerStatus::Provisioning, 1),
            (GameServerStatus::Starting, 2),
            (GameServerStatus::Running, 3),
            (GameServerStatus::Stopping, 4),
            (GameServerStatus::Stopped, 5),
            (GameServerStatus::Deleting, 6),
            (GameServerStatus::Failed, 7),
        ];
        for (status, code) in all {
            assert_eq!(status.code(), code);
            assert_eq!(GameServerStatus::try_from(code).unwrap(), status);
        }
        assert!(matches!(
            GameServerStatus::try_from(8),
            Err(StateError::UnknownStatus(8))
        ));
    }

    #[test]
    fn status_serializes_as_code() {
        let json = serde_json::to_string(&GameServerStatus::Stopped).unwrap();
        assert_eq!(json, "5");
        let back: GameServerStatus = serde_json::from_str("3").unwrap();
        assert_eq!(back, GameServerStatus::Running);
        assert!(serde_json::from_str::<GameServerStatus>("42").is_err());
    }

    #[test]
    fn location_status_serializes_lowercase() {
        let json = serde_json::to_string(&LocationStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }

    #[test]
    fn location_id_uses_short_container_id() {
        assert_eq!(
            GameServerLocation::id_for("0123456789abcdef0123"),
            "loc-0123456789ab"
        );
        assert_eq!(GameServerLocation::id_for("abc"), "loc-abc");
    }
}
