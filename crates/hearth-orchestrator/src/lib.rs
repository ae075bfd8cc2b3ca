//! hearth-orchestrator: game-server container lifecycle.
//!
//! [`GameServerOrchestrator`] composes the container runtime, the state
//! store, the location tracker and the node selector into create / start /
//! stop / restart / delete, plus log streaming and console commands.
//!
//! # Architecture
//!
//! ```text
//! GameServerOrchestrator
//!   ├── Arc<dyn ContainerRuntime>    (hearth-engine)
//!   ├── Arc<dyn GameServerStore>     (hearth-state)
//!   ├── Arc<dyn LocationTracker>     (hearth-state)
//!   ├── Arc<dyn NodeSelector>        (hearth-placement)
//!   ├── Option<Arc<dyn NodeForwarder>>
//!   └── KeyedLocks                   (one lock per game server)
//! ```

pub mod config;
pub mod error;
pub mod forward;
pub mod lock;
pub mod orchestrator;
pub mod policy;
pub mod provision;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;


pub use config::{EngineConfig, HearthConfig, NodeConfig, OrchestratorConfig};
pub use error::{OrchestratorError, OrchestratorResult};
pub use forward::{
    ForwardError, ForwardRequest, ForwardResult, ForwardedOp, GameServerView, NodeForwarder,
};
pub use lock::KeyedLocks;
pub use orchestrator::{GameServerOrchestrator, ReconcileReport};
pub use policy::TimeoutPolicy;
pub use provision::{GAME_SERVER_ID_LABEL, MANAGED_LABEL, container_name};
