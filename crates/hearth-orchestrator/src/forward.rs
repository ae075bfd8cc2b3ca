//! Cross-node forwarding of lifecycle calls.
//!
//! When placement picks another node, or a game server's container already
//! lives on another node, the call is sent to that node's orchestrator. The
//! target runs the operation locally and answers with the resulting
//! [`GameServerView`], which the origin persists. A failed forwarded start
//! is recorded on the origin as well: `Stopped` for an immediate exit,
//! `Failed` for anything else.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hearth_state::{GameServer, GameServerLocation};

/// Lifecycle operations that can run on a remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardedOp {
    Create,
    Start,
    Stop,
    Restart,
    Delete,
}

impl ForwardedOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ForwardedOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A game server together with its current location row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameServerView {
    pub game_server: GameServer,
    pub location: Option<GameServerLocation>,
}

/// Body of a forwarded call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardRequest {
    pub op: ForwardedOp,
    pub game_server: GameServer,
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("node {node_id} unreachable: {message}")]
    Unreachable { node_id: String, message: String },

    /// The target node ran the operation and it failed.
    #[error("node {node_id} rejected {op} ({status}): {message}")]
    Rejected {
        node_id: String,
        op: ForwardedOp,
        status: u16,
        message: String,
    },

    /// The target node started the container and it exited within the
    /// grace period.
    #[error("container on node {node_id} exited immediately with code {exit_code}")]
    ExitedImmediately {
        node_id: String,
        exit_code: i64,
        logs: Vec<String>,
    },

    #[error("invalid response: {0}")]
    Decode(String),
}

pub type ForwardResult<T> = Result<T, ForwardError>;

/// Sends a lifecycle call to the orchestrator on another node.
#[async_trait]
pub trait NodeForwarder: Send + Sync {
    async fn forward(
        &self,
        node_id: &str,
        op: ForwardedOp,
        game_server: &GameServer,
    ) -> ForwardResult<GameServerView>;
}
