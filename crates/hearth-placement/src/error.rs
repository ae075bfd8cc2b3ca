//! Placement error types.

use thiserror::Error;

/// Errors that can occur while choosing a node.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("no eligible node: {0}")]
    NoEligibleNode(String),

    #[error("state store error: {0}")]
    State(#[from] hearth_state::StateError),
}

pub type PlacementResult<T> = Result<T, PlacementError>;
