//! Node API handlers.
//!
//! Each handler calls into the node's `GameServerOrchestrator` and returns
//! the common JSON envelope.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use hearth_engine::{EngineError, LogLine, LogOptions};
use hearth_orchestrator::{ForwardRequest, OrchestratorError};
use hearth_state::GameServer;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// An orchestrator failure rendered as an HTTP response.
pub struct ApiError(pub OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        Self(e)
    }
}

/// HTTP status for an orchestrator error.
pub fn status_for(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::NoContainer(_) | OrchestratorError::NotRunning(_) => StatusCode::CONFLICT,
        OrchestratorError::ExitedImmediately { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestratorError::Unmanaged(_) => StatusCode::FORBIDDEN,
        OrchestratorError::NotLocal { .. } => StatusCode::MISDIRECTED_REQUEST,
        OrchestratorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        OrchestratorError::Placement(_) => StatusCode::SERVICE_UNAVAILABLE,
        OrchestratorError::Engine(EngineError::NotFound(_)) => StatusCode::NOT_FOUND,
        OrchestratorError::StartFailed { .. }
        | OrchestratorError::Engine(_)
        | OrchestratorError::Forward(_) => StatusCode::BAD_GATEWAY,
        OrchestratorError::State(_) | OrchestratorError::Task(_) | OrchestratorError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Exit details returned alongside an immediate-exit error.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExitDetails {
    pub exit_code: i64,
    pub logs: Vec<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        match self.0 {
            OrchestratorError::ExitedImmediately { exit_code, logs } => {
                let message = format!("container exited immediately with code {exit_code}");
                (
                    status,
                    Json(ApiResponse {
                        success: false,
                        data: Some(ExitDetails { exit_code, logs }),
                        error: Some(message),
                    }),
                )
                    .into_response()
            }
            other => error_response(&other.to_string(), status),
        }
    }
}

type ApiResult = Result<Response, ApiError>;

// ── Game servers ───────────────────────────────────────────────

/// POST /api/v1/gameservers
pub async fn create_game_server(
    State(state): State<ApiState>,
    Json(gs): Json<GameServer>,
) -> ApiResult {
    let created = state.orchestrator.create_game_server(&gs).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(created)).into_response())
}

/// GET /api/v1/gameservers/{id}
pub async fn get_game_server(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let view = state.orchestrator.get_game_server(&id).await?;
    Ok(ApiResponse::ok(view).into_response())
}

/// DELETE /api/v1/gameservers/{id}
pub async fn delete_game_server(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult {
    state.orchestrator.delete_game_server(&id).await?;
    Ok(ApiResponse::ok("deleted").into_response())
}

/// POST /api/v1/gameservers/{id}/start
pub async fn start_game_server(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult {
    let gs = state.orchestrator.start_game_server(&id).await?;
    Ok(ApiResponse::ok(gs).into_response())
}

/// POST /api/v1/gameservers/{id}/stop
pub async fn stop_game_server(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let gs = state.orchestrator.stop_game_server(&id).await?;
    Ok(ApiResponse::ok(gs).into_response())
}

/// POST /api/v1/gameservers/{id}/restart
pub async fn restart_game_server(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult {
    let gs = state.orchestrator.restart_game_server(&id).await?;
    Ok(ApiResponse::ok(gs).into_response())
}

/// GET /api/v1/gameservers/{id}/logs
///
/// With `follow=true` the body is a stream of newline-delimited JSON lines;
/// otherwise the lines are collected into one response.
pub async fn game_server_logs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(options): Query<LogOptions>,
) -> ApiResult {
    let stream = state.orchestrator.game_server_logs(&id, &options).await?;

    if options.follow {
        let body = Body::from_stream(stream.map(|line| {
            line.map(|line| {
                let mut buf = serde_json::to_vec(&line).unwrap_or_default();
                buf.push(b'\n');
                Bytes::from(buf)
            })
        }));
        return Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response());
    }

    let lines: Vec<LogLine> = stream
        .filter_map(|line| async move {
            line.map_err(|e| warn!(error = %e, "log stream error")).ok()
        })
        .collect()
        .await;
    Ok(ApiResponse::ok(lines).into_response())
}

/// Console command request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// POST /api/v1/gameservers/{id}/command
pub async fn send_command(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> ApiResult {
    if req.command.contains('\n') {
        return Ok(error_response("command must be a single line", StatusCode::BAD_REQUEST));
    }
    state.orchestrator.send_command(&id, &req.command).await?;
    Ok(ApiResponse::ok("sent").into_response())
}

// ── Nodes ──────────────────────────────────────────────────────

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_nodes() {
        Ok(nodes) => ApiResponse::ok(nodes).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// POST /api/v1/reconcile
pub async fn reconcile(State(state): State<ApiState>) -> ApiResult {
    let report = state.orchestrator.reconcile_locations().await?;
    Ok(ApiResponse::ok(report).into_response())
}

// ── Forwarding ─────────────────────────────────────────────────

/// POST /internal/v1/forward
pub async fn forward(State(state): State<ApiState>, Json(req): Json<ForwardRequest>) -> ApiResult {
    let view = state.orchestrator.handle_forwarded(req).await?;
    Ok(ApiResponse::ok(view).into_response())
}
