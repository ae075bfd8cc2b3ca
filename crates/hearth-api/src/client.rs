//! NodeClient: forwards lifecycle calls to a peer's node API.
//!
//! Uses a plain HTTP/1.1 connection per call (hyper client handshake over a
//! `TcpStream`). Peer addresses come from the node table in the state store.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use hearth_orchestrator::{
    ForwardError, ForwardRequest, ForwardResult, ForwardedOp, GameServerView, NodeForwarder,
};
use hearth_state::{GameServer, NodeInfo, StateStore};

use crate::FORWARD_PATH;
use crate::handlers::{ApiResponse, ExitDetails};

/// Long enough for the peer to pull an image under the default policy.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(660);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct NodeClient {
    store: StateStore,
    timeout: Duration,
}

impl NodeClient {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            timeout: DEFAULT_FORWARD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn resolve(&self, node_id: &str) -> ForwardResult<NodeInfo> {
        self.store
            .get_node(node_id)
            .map_err(|e| ForwardError::Unreachable {
                node_id: node_id.to_string(),
                message: format!("node lookup failed: {e}"),
            })?
            .ok_or_else(|| ForwardError::UnknownNode(node_id.to_string()))
    }

    async fn post(&self, node: &NodeInfo, body: Vec<u8>) -> ForwardResult<(u16, Bytes)> {
        let unreachable = |message: String| ForwardError::Unreachable {
            node_id: node.id.clone(),
            message,
        };
        let authority = format!("{}:{}", node.address, node.api_port);

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&authority))
            .await
            .map_err(|_| unreachable(format!("connect {authority}: timed out")))?
            .map_err(|e| unreachable(format!("connect {authority}: {e}")))?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| unreachable(format!("handshake: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                trace!(error = %e, "peer connection closed with error");
            }
        });

        let req = Request::builder()
            .method("POST")
            .uri(FORWARD_PATH)
            .header("host", &authority)
            .header("content-type", "application/json")
            .header("user-agent", "hearth-node/0.1")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| unreachable(format!("build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| unreachable(format!("request: {e}")))?;
        let status = resp.status().as_u16();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map(|c| c.to_bytes())
            .map_err(|e| unreachable(format!("read body: {e}")))?;
        Ok((status, bytes))
    }
}

#[async_trait]
impl NodeForwarder for NodeClient {
    async fn forward(
        &self,
        node_id: &str,
        op: ForwardedOp,
        game_server: &GameServer,
    ) -> ForwardResult<GameServerView> {
        let node = self.resolve(node_id)?;
        let body = serde_json::to_vec(&ForwardRequest {
            op,
            game_server: game_server.clone(),
        })
        .map_err(|e| ForwardError::Decode(e.to_string()))?;

        debug!(node = %node_id, %op, game_server_id = %game_server.id, "forwarding call");
        let (status, bytes) = tokio::time::timeout(self.timeout, self.post(&node, body))
            .await
            .map_err(|_| ForwardError::Unreachable {
                node_id: node_id.to_string(),
                message: format!("timed out after {:?}", self.timeout),
            })??;

        decode_response(node_id, op, status, &bytes)
    }
}

/// Turn a peer's envelope into a view or a typed rejection.
///
/// Failure envelopes may carry unrelated `data` (exit details), so the
/// envelope is read loosely before the view is extracted. A 422 carrying
/// exit details becomes [`ForwardError::ExitedImmediately`].
fn decode_response(
    node_id: &str,
    op: ForwardedOp,
    status: u16,
    body: &[u8],
) -> ForwardResult<GameServerView> {
    let rejected = |message: String| ForwardError::Rejected {
        node_id: node_id.to_string(),
        op,
        status,
        message,
    };
    let ok = (200..300).contains(&status);

    let envelope: ApiResponse<serde_json::Value> = match serde_json::from_slice(body) {
        Ok(env) => env,
        Err(e) if ok => return Err(ForwardError::Decode(e.to_string())),
        Err(_) => return Err(rejected(String::from_utf8_lossy(body).trim().to_string())),
    };

    if status == 422 {
        let details = envelope
            .data
            .clone()
            .and_then(|d| serde_json::from_value::<ExitDetails>(d).ok());
        if let Some(ExitDetails { exit_code, logs }) = details {
            return Err(ForwardError::ExitedImmediately {
                node_id: node_id.to_string(),
                exit_code,
                logs,
            });
        }
    }
    if !(ok && envelope.success) {
        return Err(rejected(
            envelope.error.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }
    let data = envelope
        .data
        .ok_or_else(|| ForwardError::Decode("response carried no data".to_string()))?;
    serde_json::from_value(data).map_err(|e| ForwardError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_carries_peer_error() {
        let body = br#"{"success":false,"error":"container exited immediately with code 1"}"#;
        let err = decode_response("node-b", ForwardedOp::Start, 422, body).unwrap_err();
        match err {
            ForwardError::Rejected { status, message, .. } => {
                assert_eq!(status, 422);
                assert!(message.contains("exited immediately with code 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn fast_exit_keeps_exit_code_and_logs() {
        let body = br#"{"success":false,"data":{"exit_code":1,"logs":["Failed to bind to port 25565"]},"error":"container exited immediately with code 1"}"#;
        let err = decode_response("node-b", ForwardedOp::Start, 422, body).unwrap_err();
        match err {
            ForwardError::ExitedImmediately {
                node_id,
                exit_code,
                logs,
            } => {
                assert_eq!(node_id, "node-b");
                assert_eq!(exit_code, 1);
                assert_eq!(logs, vec!["Failed to bind to port 25565".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_json_failure_is_rejected_with_body() {
        let err = decode_response("node-b", ForwardedOp::Stop, 502, b"bad gateway").unwrap_err();
        assert!(matches!(err, ForwardError::Rejected { status: 502, .. }));
    }

    #[test]
    fn unknown_node_is_reported() {
        let client = NodeClient::new(StateStore::open_in_memory().unwrap());
        assert!(matches!(client.resolve("ghost"), Err(ForwardError::UnknownNode(_))));
    }
}
