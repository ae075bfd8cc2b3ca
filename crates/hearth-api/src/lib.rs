//! hearth-api: the node API.
//!
//! Every hearth node serves this router. The owning control plane calls the
//! lifecycle routes; peer nodes call `/internal/v1/forward` through
//! [`NodeClient`] when a game server is placed on, or lives on, this node.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/gameservers` | Create a game server's container |
//! | GET | `/api/v1/gameservers/{id}` | Game server with its location |
//! | DELETE | `/api/v1/gameservers/{id}` | Remove its container |
//! | POST | `/api/v1/gameservers/{id}/start` | Start |
//! | POST | `/api/v1/gameservers/{id}/stop` | Stop |
//! | POST | `/api/v1/gameservers/{id}/restart` | Restart |
//! | GET | `/api/v1/gameservers/{id}/logs` | Logs (`tail`, `follow`, `since`, `until`, `timestamps`) |
//! | POST | `/api/v1/gameservers/{id}/command` | Console command |
//! | GET | `/api/v1/nodes` | Registered nodes |
//! | POST | `/api/v1/reconcile` | Reconcile location rows now |
//! | POST | `/internal/v1/forward` | Run a forwarded lifecycle call |

pub mod client;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use hearth_orchestrator::GameServerOrchestrator;
use hearth_state::StateStore;

pub use client::NodeClient;
pub use handlers::{ApiResponse, CommandRequest, ExitDetails};

/// Path peers post forwarded calls to.
pub const FORWARD_PATH: &str = "/internal/v1/forward";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<GameServerOrchestrator>,
    pub store: StateStore,
}

/// Build the node API router.
pub fn build_router(orchestrator: Arc<GameServerOrchestrator>, store: StateStore) -> Router {
    let state = ApiState {
        orchestrator,
        store,
    };

    let api_routes = Router::new()
        .route("/gameservers", post(handlers::create_game_server))
        .route(
            "/gameservers/{id}",
            get(handlers::get_game_server).delete(handlers::delete_game_server),
        )
        .route("/gameservers/{id}/start", post(handlers::start_game_server))
        .route("/gameservers/{id}/stop", post(handlers::stop_game_server))
        .route("/gameservers/{id}/restart", post(handlers::restart_game_server))
        .route("/gameservers/{id}/logs", get(handlers::game_server_logs))
        .route("/gameservers/{id}/command", post(handlers::send_command))
        .route("/nodes", get(handlers::list_nodes))
        .route("/reconcile", post(handlers::reconcile))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route(FORWARD_PATH, post(handlers::forward).with_state(state))
}
