//! Node selection: picks the node that hosts a new game server.
//!
//! Candidates are the registered nodes plus the local node. A candidate is
//! eligible when it is not draining, is below the per-node ceiling, carries
//! every required label and has room for the game server. The configured
//! strategy then picks one eligible node.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use hearth_state::{NodeInfo, StateStore};

use crate::convert::node_usage;
use crate::error::{PlacementError, PlacementResult};
use crate::scorer::{NodeResources, PlacementRequirements, ScoringWeights, fits, rank_nodes};

/// The node chosen to host a game server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedNode {
    pub id: String,
    pub hostname: String,
    pub address: String,
    pub api_port: u16,
}

impl From<&NodeInfo> for SelectedNode {
    fn from(node: &NodeInfo) -> Self {
        Self {
            id: node.id.clone(),
            hostname: node.hostname.clone(),
            address: node.address.clone(),
            api_port: node.api_port,
        }
    }
}

/// Chooses a target node for a game server.
pub trait NodeSelector: Send + Sync {
    fn select_node(&self, req: &PlacementRequirements) -> PlacementResult<SelectedNode>;
}

/// How to choose among eligible nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementStrategy {
    /// Always the node this process runs on.
    #[default]
    Local,
    /// Cycle through eligible nodes in ID order.
    RoundRobin,
    /// Fewest active game servers, then lowest memory utilization.
    LeastLoaded,
    /// Weighted scoring that prefers packing nodes full.
    BinPack,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub strategy: PlacementStrategy,
    /// Maximum game servers per node; unset means no ceiling.
    pub max_per_node: Option<u32>,
    pub weights: ScoringWeights,
}

/// [`NodeSelector`] backed by the state store's node and location tables.
pub struct StrategySelector {
    store: StateStore,
    local: NodeInfo,
    config: PlacementConfig,
    next: AtomicUsize,
}

impl StrategySelector {
    pub fn new(store: StateStore, local: NodeInfo, config: PlacementConfig) -> Self {
        Self {
            store,
            local,
            config,
            next: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Registered nodes plus the local node, sorted by ID.
    fn candidates(&self) -> PlacementResult<Vec<NodeInfo>> {
        let mut nodes = self.store.list_nodes()?;
        if !nodes.iter().any(|n| n.id == self.local.id) {
            nodes.push(self.local.clone());
        }
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    /// Usage for every candidate, computed from the location rows.
    fn usage(&self, nodes: &[NodeInfo]) -> PlacementResult<Vec<NodeResources>> {
        let locations = self.store.list_locations()?;
        let game_servers: HashMap<_, _> = self
            .store
            .list_game_servers()?
            .into_iter()
            .map(|gs| (gs.id.clone(), gs))
            .collect();
        Ok(nodes
            .iter()
            .map(|n| node_usage(n, &locations, &game_servers))
            .collect())
    }

    fn under_ceiling(&self, res: &NodeResources) -> bool {
        self.config
            .max_per_node
            .is_none_or(|max| res.active_game_servers < max)
    }

    fn eligible<'a>(
        &self,
        usage: &'a [NodeResources],
        req: &PlacementRequirements,
    ) -> Vec<&'a NodeResources> {
        usage
            .iter()
            .filter(|res| {
                let ok = self.under_ceiling(res) && fits(res, req);
                if !ok {
                    debug!(node = %res.node_id, active = res.active_game_servers, "node not eligible");
                }
                ok
            })
            .collect()
    }

    fn pick(
        &self,
        usage: &[NodeResources],
        req: &PlacementRequirements,
    ) -> PlacementResult<String> {
        let eligible = self.eligible(usage, req);
        if eligible.is_empty() {
            return Err(PlacementError::NoEligibleNode(format!(
                "{} candidate node(s), none eligible",
                usage.len()
            )));
        }

        let chosen = match self.config.strategy {
            PlacementStrategy::Local => eligible
                .iter()
                .find(|res| res.node_id == self.local.id)
                .map(|res| res.node_id.clone())
                .ok_or_else(|| {
                    PlacementError::NoEligibleNode(format!("local node {} is not eligible", self.local.id))
                })?,
            PlacementStrategy::RoundRobin => {
                let idx = self.next.fetch_add(1, Ordering::Relaxed) % eligible.len();
                eligible[idx].node_id.clone()
            }
            PlacementStrategy::LeastLoaded => eligible
                .iter()
                .min_by(|a, b| {
                    a.active_game_servers
                        .cmp(&b.active_game_servers)
                        .then_with(|| {
                            a.utilization()
                                .partial_cmp(&b.utilization())
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .then_with(|| a.node_id.cmp(&b.node_id))
                })
                .map(|res| res.node_id.clone())
                .ok_or_else(|| PlacementError::NoEligibleNode("no candidates".to_string()))?,
            PlacementStrategy::BinPack => {
                let candidates: Vec<NodeResources> = eligible.into_iter().cloned().collect();
                rank_nodes(&candidates, req, &self.config.weights)
                    .into_iter()
                    .next()
                    .map(|score| score.node_id)
                    .ok_or_else(|| PlacementError::NoEligibleNode("no node scored".to_string()))?
            }
        };
        Ok(chosen)
    }
}

impl NodeSelector for StrategySelector {
    fn select_node(&self, req: &PlacementRequirements) -> PlacementResult<SelectedNode> {
        let nodes = self.candidates()?;
        let usage = self.usage(&nodes)?;
        let chosen = match self.pick(&usage, req) {
            Ok(id) => id,
            Err(e) => {
                warn!(strategy = ?self.config.strategy, error = %e, "placement failed");
                return Err(e);
            }
        };

        let node = nodes
            .iter()
            .find(|n| n.id == chosen)
            .ok_or_else(|| PlacementError::NoEligibleNode(format!("node {chosen} vanished")))?;
        debug!(node = %node.id, strategy = ?self.config.strategy, "node selected");
        Ok(SelectedNode::from(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_state::{GameServer, GameServerLocation, LocationStatus, epoch_secs};

    fn node(id: &str, mem: u64) -> NodeInfo {
        NodeInfo {
            id: id.to_string(),
            hostname: format!("{id}.local"),
            address: format!("10.0.0.{}", id.len()),
            api_port: 7700,
            capacity_memory_bytes: mem,
            capacity_cpu_shares: 0,
            labels: HashMap::new(),
            draining: false,
            last_seen: 0,
        }
    }

    fn place(store: &StateStore, gs_id: &str, node_id: &str, mem: u64) {
        store
            .put_game_server(&GameServer::new(gs_id, "img", 25565, mem, 1.0))
            .unwrap();
        let now = epoch_secs();
        let cid = format!("container-{gs_id}");
        store
            .put_location(&GameServerLocation {
                id: GameServerLocation::id_for(&cid),
                game_server_id: gs_id.to_string(),
                node_id: node_id.to_string(),
                node_hostname: format!("{node_id}.local"),
                node_ip: None,
                container_id: cid,
                status: LocationStatus::Running,
                port: 25565,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
    }

    fn selector(store: StateStore, strategy: PlacementStrategy, max: Option<u32>) -> StrategySelector {
        StrategySelector::new(
            store,
            node("local", 0),
            PlacementConfig {
                strategy,
                max_per_node: max,
                weights: ScoringWeights::default(),
            },
        )
    }

    fn req(mem: u64) -> PlacementRequirements {
        PlacementRequirements {
            memory_bytes: mem,
            ..Default::default()
        }
    }

    #[test]
    fn local_strategy_uses_unregistered_local_node() {
        let store = StateStore::open_in_memory().unwrap();
        let sel = selector(store, PlacementStrategy::Local, None);
        let chosen = sel.select_node(&req(1024)).unwrap();
        assert_eq!(chosen.id, "local");
        assert_eq!(chosen.hostname, "local.local");
    }

    #[test]
    fn ceiling_rejects_full_local_node() {
        let store = StateStore::open_in_memory().unwrap();
        place(&store, "gs-1", "local", 0);
        let sel = selector(store, PlacementStrategy::Local, Some(1));
        assert!(matches!(
            sel.select_node(&req(0)),
            Err(PlacementError::NoEligibleNode(_))
        ));
    }

    #[test]
    fn round_robin_cycles_in_id_order() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_node(&node("b", 0)).unwrap();
        store.put_node(&node("a", 0)).unwrap();
        let sel = selector(store, PlacementStrategy::RoundRobin, None);

        let picks: Vec<String> = (0..4).map(|_| sel.select_node(&req(0)).unwrap().id).collect();
        assert_eq!(picks, vec!["a", "b", "local", "a"]);
    }

    #[test]
    fn least_loaded_prefers_fewest_game_servers() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_node(&node("a", 0)).unwrap();
        store.put_node(&node("b", 0)).unwrap();
        place(&store, "gs-1", "a", 0);
        place(&store, "gs-2", "local", 0);
        let sel = selector(store, PlacementStrategy::LeastLoaded, None);
        assert_eq!(sel.select_node(&req(0)).unwrap().id, "b");
    }

    #[test]
    fn draining_nodes_are_skipped() {
        let store = StateStore::open_in_memory().unwrap();
        let mut a = node("a", 0);
        a.draining = true;
        store.put_node(&a).unwrap();
        let sel = selector(store, PlacementStrategy::RoundRobin, None);
        for _ in 0..3 {
            assert_eq!(sel.select_node(&req(0)).unwrap().id, "local");
        }
    }

    #[test]
    fn bin_pack_fills_the_fuller_node_that_still_fits() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_node(&node("a", 8 << 30)).unwrap();
        store.put_node(&node("b", 8 << 30)).unwrap();
        place(&store, "gs-1", "a", 6 << 30);
        place(&store, "gs-2", "b", 1 << 30);
        let mut sel = selector(store, PlacementStrategy::BinPack, None);
        sel.local.draining = true;
        sel.config.weights = ScoringWeights {
            bin_packing: 1.0,
            affinity: 0.0,
            balance: 0.0,
        };

        assert_eq!(sel.select_node(&req(1 << 30)).unwrap().id, "a");
        // Too big for `a` now, so `b` wins.
        assert_eq!(sel.select_node(&req(4 << 30)).unwrap().id, "b");
    }

    #[test]
    fn strategy_parses_kebab_case() {
        let cfg: PlacementConfig =
            serde_json::from_str(r#"{"strategy":"least-loaded","max_per_node":4}"#).unwrap();
        assert_eq!(cfg.strategy, PlacementStrategy::LeastLoaded);
        assert_eq!(cfg.max_per_node, Some(4));
    }
}
