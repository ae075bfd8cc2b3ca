//! Node scoring for placement decisions.
//!
//! Evaluates candidate nodes using a weighted combination of:
//! - **Bin-packing** (best-fit): prefer nodes that will be most full after placement
//! - **Affinity**: prefer nodes whose labels match the requested labels
//! - **Balance**: prefer nodes close to the cluster's average utilization
//!
//! Nodes that are draining, miss a required label, or cannot fit the game
//! server are rejected outright. A capacity of zero means "not reported" and
//! is treated as unbounded.

use std::collections::HashMap;

/// Resource capacity and usage for a single node.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NodeResources {
    pub node_id: String,
    pub labels: HashMap<String, String>,
    pub capacity_memory_bytes: u64,
    pub capacity_cpu_shares: u64,
    pub used_memory_bytes: u64,
    pub used_cpu_shares: u64,
    /// Game servers currently placed on this node.
    pub active_game_servers: u32,
    pub is_draining: bool,
}

impl NodeResources {
    pub fn free_memory(&self) -> u64 {
        self.capacity_memory_bytes.saturating_sub(self.used_memory_bytes)
    }

    pub fn free_cpu(&self) -> u64 {
        self.capacity_cpu_shares.saturating_sub(self.used_cpu_shares)
    }

    /// Memory utilization in `0.0..=1.0`, or 0.5 when capacity is unknown.
    pub fn utilization(&self) -> f64 {
        if self.capacity_memory_bytes > 0 {
            (self.used_memory_bytes as f64 / self.capacity_memory_bytes as f64).min(1.0)
        } else {
            0.5
        }
    }
}

/// What a single game server needs from its node.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PlacementRequirements {
    pub memory_bytes: u64,
    pub cpu_shares: u64,
    /// Required label matches (all must match).
    pub required_labels: HashMap<String, String>,
    /// Preferred label matches (soft affinity, adds score).
    pub preferred_labels: HashMap<String, String>,
}

/// Scored placement result for a single node.
#[derive(Debug, Clone)]
pub struct NodeScore {
    pub node_id: String,
    /// Total composite score (higher = better). Range: 0.0..=100.0.
    pub score: f64,
    /// Breakdown of score components.
    pub breakdown: ScoreBreakdown,
}

/// Individual score components for debugging.
#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    pub bin_packing: f64,
    pub affinity: f64,
    pub balance: f64,
}

/// Weights for the scoring components.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ScoringWeights {
    pub bin_packing: f64,
    pub affinity: f64,
    pub balance: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            bin_packing: 0.5,
            affinity: 0.3,
            balance: 0.2,
        }
    }
}

/// Whether the node can host the game server at all.
pub fn fits(node: &NodeResources, req: &PlacementRequirements) -> bool {
    if node.is_draining {
        return false;
    }
    let labels_ok = req
        .required_labels
        .iter()
        .all(|(k, v)| node.labels.get(k).is_some_and(|nv| nv == v));
    if !labels_ok {
        return false;
    }
    let mem_ok = node.capacity_memory_bytes == 0 || node.free_memory() >= req.memory_bytes;
    let cpu_ok = node.capacity_cpu_shares == 0 || node.free_cpu() >= req.cpu_shares;
    mem_ok && cpu_ok
}

/// Score a single node for the given placement requirements.
pub fn score_node(
    node: &NodeResources,
    req: &PlacementRequirements,
    weights: &ScoringWeights,
    cluster_avg_utilization: f64,
) -> Option<NodeScore> {
    if !fits(node, req) {
        return None;
    }

    // Higher = more packed after placement.
    let bin_packing = if node.capacity_memory_bytes > 0 {
        let projected = node.used_memory_bytes.saturating_add(req.memory_bytes);
        (projected as f64 / node.capacity_memory_bytes as f64).min(1.0) * 100.0
    } else {
        50.0
    };

    let total_preferred = req.preferred_labels.len();
    let matched = req
        .preferred_labels
        .iter()
        .filter(|(k, v)| node.labels.get(*k).is_some_and(|nv| nv == *v))
        .count();
    let affinity = if total_preferred > 0 {
        (matched as f64 / total_preferred as f64) * 100.0
    } else {
        50.0 // Neutral when no preferences.
    };

    let balance = (1.0 - (node.utilization() - cluster_avg_utilization).abs()).max(0.0) * 100.0;

    let score = weights.bin_packing * bin_packing
        + weights.affinity * affinity
        + weights.balance * balance;

    Some(NodeScore {
        node_id: node.node_id.clone(),
        score,
        breakdown: ScoreBreakdown {
            bin_packing,
            affinity,
            balance,
        },
    })
}

/// Score all nodes and return a sorted list (best first, ties by node ID).
pub fn rank_nodes(
    nodes: &[NodeResources],
    req: &PlacementRequirements,
    weights: &ScoringWeights,
) -> Vec<NodeScore> {
    let cluster_avg = if nodes.is_empty() {
        0.5
    } else {
        nodes.iter().map(NodeResources::utilization).sum::<f64>() / nodes.len() as f64
    };

    let mut scores: Vec<NodeScore> = nodes
        .iter()
        .filter_map(|n| score_node(n, req, weights, cluster_avg))
        .collect();

    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    scores
}
