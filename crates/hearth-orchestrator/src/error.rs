//! Orchestrator error types.

use std::time::Duration;

use hearth_engine::EngineError;
use hearth_placement::PlacementError;
use hearth_state::StateError;
use thiserror::Error;

use crate::forward::ForwardError;

/// Errors returned by lifecycle operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("game server not found: {0}")]
    NotFound(String),

    #[error("game server {0} has no container")]
    NoContainer(String),

    /// The container started and then exited within the grace period.
    #[error("container exited immediately with code {exit_code}")]
    ExitedImmediately { exit_code: i64, logs: Vec<String> },

    #[error("failed to start game server {id}: {source}")]
    StartFailed {
        id: String,
        #[source]
        source: EngineError,
    },

    /// A container with a managed name lacks the ownership label.
    #[error("container {0} is not managed by hearth")]
    Unmanaged(String),

    #[error("game server {0} is not running")]
    NotRunning(String),

    /// Logs and console commands are only served by the node hosting the container.
    #[error("game server {id} runs on node {node_id}")]
    NotLocal { id: String, node_id: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("background task failed: {0}")]
    Task(String),

    #[error("container runtime error: {0}")]
    Engine(#[from] EngineError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("forwarding error: {0}")]
    Forward(#[from] ForwardError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
