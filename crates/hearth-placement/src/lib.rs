//! hearth-placement: choose the node that hosts a new game server.
//!
//! Given the registered nodes and the game servers already placed on them,
//! the selector filters out nodes that are draining, at their per-node
//! ceiling, or short on resources, then applies the configured strategy.
//!
//! # Components
//!
//! - **`scorer`**: Node scoring (bin-packing, affinity, balance)
//! - **`convert`**: Usage accounting from state store records
//! - **`selector`**: `NodeSelector` trait and the strategy-driven selector

pub mod convert;
pub mod error;
pub mod scorer;
pub mod selector;

pub use convert::{cpu_shares, game_server_requirements, node_usage};
pub use error::{PlacementError, PlacementResult};
pub use scorer::{
    NodeResources, NodeScore, PlacementRequirements, ScoringWeights, fits, rank_nodes, score_node,
};
pub use selector::{NodeSelector, PlacementConfig, PlacementStrategy, SelectedNode, StrategySelector};
