//! Node API route tests.
//!
//! Drives the router with `oneshot` against a fake container runtime and an
//! in-memory state store.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use hearth_api::{FORWARD_PATH, build_router};
use hearth_orchestrator::fake::FakeRuntime;
use hearth_orchestrator::{
    ForwardRequest, ForwardedOp, GameServerOrchestrator, NodeConfig, OrchestratorConfig,
    TimeoutPolicy,
};
use hearth_placement::{PlacementConfig, StrategySelector};
use hearth_state::{GameServer, GameServerStatus, LocationTracker, StateStore};

struct Node {
    rt: Arc<FakeRuntime>,
    store: StateStore,
    router: Router,
    _dir: TempDir,
}

fn node() -> Node {
    let dir = tempfile::tempdir().unwrap();
    let rt = Arc::new(FakeRuntime::new());
    let store = StateStore::open_in_memory().unwrap();
    let config = NodeConfig {
        id: "node-a".to_string(),
        hostname: "a.hearth.internal".to_string(),
        ip: Some("127.0.0.1".to_string()),
        ..Default::default()
    };
    let selector = Arc::new(StrategySelector::new(
        store.clone(),
        config.to_node_info(7700),
        PlacementConfig::default(),
    ));
    let orch = GameServerOrchestrator::new(
        rt.clone(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        selector,
        None,
        config,
        OrchestratorConfig {
            data_root: dir.path().to_path_buf(),
            start_grace_ms: 10,
            pull: TimeoutPolicy::detached(Duration::from_secs(5)),
            attach: TimeoutPolicy::detached(Duration::from_secs(5)),
            ..Default::default()
        },
    );
    let router = build_router(Arc::new(orch), store.clone());
    Node {
        rt,
        store,
        router,
        _dir: dir,
    }
}

fn game_server(id: &str) -> GameServer {
    GameServer::new(id, "itzg/minecraft-server:latest", 25565, 1 << 30, 1.0)
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn create(n: &Node, id: &str) -> (StatusCode, Value) {
    let body = serde_json::to_value(game_server(id)).unwrap();
    call(&n.router, "POST", "/api/v1/gameservers", Some(body)).await
}

#[tokio::test]
async fn create_returns_created_with_container() {
    let n = node();
    let (status, json) = create(&n, "gs-1").await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["success"], true);
    assert!(json["data"]["container_id"].is_string());
    assert!(n.rt.container("gameserver-gs-1").is_some());
}

#[tokio::test]
async fn get_includes_location() {
    let n = node();
    create(&n, "gs-1").await;

    let (status, json) = call(&n.router, "GET", "/api/v1/gameservers/gs-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["game_server"]["id"], "gs-1");
    assert_eq!(json["data"]["location"]["node_id"], "node-a");
}

#[tokio::test]
async fn unknown_game_server_is_404() {
    let n = node();
    let (status, json) = call(&n.router, "POST", "/api/v1/gameservers/nope/start", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn start_and_stop_round_trip() {
    let n = node();
    create(&n, "gs-1").await;

    let (status, json) = call(&n.router, "POST", "/api/v1/gameservers/gs-1/start", None).await;
    assert_eq!(status, StatusCode::OK);
    let started: GameServer = serde_json::from_value(json["data"].clone()).unwrap();
    assert_eq!(started.status, GameServerStatus::Running);

    let (status, json) = call(&n.router, "POST", "/api/v1/gameservers/gs-1/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    let stopped: GameServer = serde_json::from_value(json["data"].clone()).unwrap();
    assert_eq!(stopped.status, GameServerStatus::Stopped);
}

#[tokio::test]
async fn restart_running_server() {
    let n = node();
    create(&n, "gs-1").await;
    call(&n.router, "POST", "/api/v1/gameservers/gs-1/start", None).await;

    let (status, json) = call(&n.router, "POST", "/api/v1/gameservers/gs-1/restart", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], serde_json::to_value(GameServerStatus::Running).unwrap());
}

#[tokio::test]
async fn fast_crash_is_unprocessable_with_logs() {
    let n = node();
    create(&n, "gs-1").await;
    n.rt.crash_on_start("gameserver-gs-1", 1, &["Failed to bind to port 25565"]);

    let (status, json) = call(&n.router, "POST", "/api/v1/gameservers/gs-1/start", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["success"], false);
    assert_eq!(json["data"]["exit_code"], 1);
    assert!(
        json["data"]["logs"]
            .as_array()
            .unwrap()
            .iter()
            .any(|l| l.as_str().unwrap().contains("Failed to bind"))
    );
    assert!(json["error"].as_str().unwrap().contains("exited immediately with code 1"));
}

#[tokio::test]
async fn delete_removes_container_and_location() {
    let n = node();
    create(&n, "gs-1").await;

    let (status, _) = call(&n.router, "DELETE", "/api/v1/gameservers/gs-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(n.rt.container_count(), 0);
    assert!(n.store.location_for_game_server("gs-1").unwrap().is_none());
}

#[tokio::test]
async fn command_reaches_stdin() {
    let n = node();
    create(&n, "gs-1").await;
    let (_, json) = call(&n.router, "POST", "/api/v1/gameservers/gs-1/start", None).await;
    let container_id = json["data"]["container_id"].as_str().unwrap().to_string();

    let body = serde_json::json!({ "command": "say hi" });
    let (status, _) = call(&n.router, "POST", "/api/v1/gameservers/gs-1/command", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(n.rt.stdin(&container_id), "say hi\n");
}

#[tokio::test]
async fn multi_line_command_is_rejected() {
    let n = node();
    create(&n, "gs-1").await;
    let body = serde_json::json!({ "command": "say hi\nstop" });
    let (status, _) = call(&n.router, "POST", "/api/v1/gameservers/gs-1/command", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn command_to_stopped_server_conflicts() {
    let n = node();
    create(&n, "gs-1").await;
    let body = serde_json::json!({ "command": "list" });
    let (status, _) = call(&n.router, "POST", "/api/v1/gameservers/gs-1/command", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn logs_honour_tail() {
    let n = node();
    create(&n, "gs-1").await;
    n.rt.crash_on_start("gameserver-gs-1", 2, &["one", "two", "three"]);
    call(&n.router, "POST", "/api/v1/gameservers/gs-1/start", None).await;

    let (status, json) = call(&n.router, "GET", "/api/v1/gameservers/gs-1/logs?tail=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let messages: Vec<&str> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["message"].as_str().unwrap())
        .collect();
    assert_eq!(messages, vec!["two", "three"]);
}

#[tokio::test]
async fn nodes_lists_registered_peers() {
    let n = node();
    let mut peer = NodeConfig {
        id: "node-b".to_string(),
        ..Default::default()
    }
    .to_node_info(7700);
    peer.address = "10.0.0.2".to_string();
    n.store.put_node(&peer).unwrap();

    let (status, json) = call(&n.router, "GET", "/api/v1/nodes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        json["data"]
            .as_array()
            .unwrap()
            .iter()
            .any(|node| node["id"] == "node-b")
    );
}

#[tokio::test]
async fn reconcile_reports_counts() {
    let n = node();
    create(&n, "gs-1").await;
    let (status, json) = call(&n.router, "POST", "/api/v1/reconcile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["seen"], 1);
}

#[tokio::test]
async fn forward_route_runs_operation_locally() {
    let n = node();
    let body = serde_json::to_value(ForwardRequest {
        op: ForwardedOp::Create,
        game_server: game_server("gs-9"),
    })
    .unwrap();

    let (status, json) = call(&n.router, "POST", FORWARD_PATH, Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["location"]["node_id"], "node-a");
    assert!(n.store.get_game_server("gs-9").unwrap().is_some());
    assert!(n.rt.container("gameserver-gs-9").is_some());
}
