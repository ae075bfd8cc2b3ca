//! Type conversions between state store types and placement types.
//!
//! Bridges `hearth_state::{NodeInfo, GameServer, GameServerLocation}` to the
//! placement engine's `NodeResources` and `PlacementRequirements`.

use std::collections::HashMap;

use hearth_state::{GameServer, GameServerLocation, LocationStatus, NodeInfo};

use crate::scorer::{NodeResources, PlacementRequirements};

/// CPU shares the engine assigns to one full core.
pub const SHARES_PER_CORE: f64 = 1024.0;

/// Whether a location row still occupies capacity on its node.
fn occupies_capacity(location: &GameServerLocation) -> bool {
    matches!(
        location.status,
        LocationStatus::Created | LocationStatus::Starting | LocationStatus::Running
    )
}

/// Build [`NodeResources`] for a node by summing the requirements of every
/// game server with a live location row on it.
///
/// Rows whose game server record is gone still count towards the instance
/// count but contribute no resources.
pub fn node_usage(
    node: &NodeInfo,
    locations: &[GameServerLocation],
    game_servers: &HashMap<String, GameServer>,
) -> NodeResources {
    let mut used_memory_bytes = 0u64;
    let mut used_cpu_shares = 0u64;
    let mut active = 0u32;

    for loc in locations
        .iter()
        .filter(|l| l.node_id == node.id && occupies_capacity(l))
    {
        active += 1;
        if let Some(gs) = game_servers.get(&loc.game_server_id) {
            used_memory_bytes = used_memory_bytes.saturating_add(gs.memory_bytes);
            used_cpu_shares = used_cpu_shares.saturating_add(cpu_shares(gs.cpu_cores));
        }
    }

    NodeResources {
        node_id: node.id.clone(),
        labels: node.labels.clone(),
        capacity_memory_bytes: node.capacity_memory_bytes,
        capacity_cpu_shares: node.capacity_cpu_shares,
        used_memory_bytes,
        used_cpu_shares,
        active_game_servers: active,
        is_draining: node.draining,
    }
}

/// Convert a [`GameServer`] to [`PlacementRequirements`].
pub fn game_server_requirements(gs: &GameServer) -> PlacementRequirements {
    PlacementRequirements {
        memory_bytes: gs.memory_bytes,
        cpu_shares: cpu_shares(gs.cpu_cores),
        required_labels: HashMap::new(),
        preferred_labels: HashMap::new(),
    }
}

/// Cores to engine CPU shares.
pub fn cpu_shares(cores: f64) -> u64 {
    if cores.is_finite() && cores > 0.0 {
        (cores * SHARES_PER_CORE).round() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_state::epoch_secs;

    fn sample_node() -> NodeInfo {
        NodeInfo {
            id: "node-1".to_string(),
            hostname: "host-1".to_string(),
            address: "10.0.0.1".to_string(),
            api_port: 7700,
            capacity_memory_bytes: 8 << 30,
            capacity_cpu_shares: 8192,
            labels: HashMap::from([("region".to_string(), "eu-west".to_string())]),
            draining: false,
            last_seen: 0,
        }
    }

    fn location(gs: &str, node: &str, cid: &str, status: LocationStatus) -> GameServerLocation {
        let now = epoch_secs();
        GameServerLocation {
            id: GameServerLocation::id_for(cid),
            game_server_id: gs.to_string(),
            node_id: node.to_string(),
            node_hostname: "host-1".to_string(),
            node_ip: None,
            container_id: cid.to_string(),
            status,
            port: 25565,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn cpu_shares_per_core() {
        assert_eq!(cpu_shares(1.0), 1024);
        assert_eq!(cpu_shares(2.5), 2560);
        assert_eq!(cpu_shares(0.0), 0);
        assert_eq!(cpu_shares(f64::NAN), 0);
    }

    #[test]
    fn requirements_from_game_server() {
        let gs = GameServer::new("gs-1", "itzg/minecraft-server", 25565, 2 << 30, 2.0);
        let req = game_server_requirements(&gs);
        assert_eq!(req.memory_bytes, 2 << 30);
        assert_eq!(req.cpu_shares, 2048);
    }

    #[test]
    fn usage_counts_only_live_rows_on_this_node() {
        let node = sample_node();
        let game_servers = HashMap::from([
            (
                "gs-1".to_string(),
                GameServer::new("gs-1", "img", 25565, 1 << 30, 1.0),
            ),
            (
                "gs-2".to_string(),
                GameServer::new("gs-2", "img", 25566, 2 << 30, 2.0),
            ),
        ]);
        let locations = vec![
            location("gs-1", "node-1", "c1", LocationStatus::Running),
            location("gs-2", "node-1", "c2", LocationStatus::Stopped),
            location("gs-2", "node-2", "c3", LocationStatus::Running),
        ];

        let res = node_usage(&node, &locations, &game_servers);
        assert_eq!(res.node_id, "node-1");
        assert_eq!(res.active_game_servers, 1);
        assert_eq!(res.used_memory_bytes, 1 << 30);
        assert_eq!(res.used_cpu_shares, 1024);
        assert_eq!(res.labels.get("region").unwrap(), "eu-west");
        assert!(!res.is_draining);
    }

    #[test]
    fn orphan_rows_count_without_resources() {
        let node = sample_node();
        let locations = vec![location("gone", "node-1", "c1", LocationStatus::Created)];
        let res = node_usage(&node, &locations, &HashMap::new());
        assert_eq!(res.active_game_servers, 1);
        assert_eq!(res.used_memory_bytes, 0);
    }
}
