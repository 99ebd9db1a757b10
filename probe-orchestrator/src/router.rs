use std::str::FromStr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use time::format_description::well_known::Rfc3339;
use tower_http::trace::TraceLayer;

use health::HealthRegistry;
use probe_common::api::{
    CancelResponse, HealthResponse, InitializeResponse, StartRequest, StartResponse,
    TestStatusResponse,
};
use probe_common::TestId;

use crate::error::OrchestratorError;
use crate::queue::CancelResult;
use crate::supervisor::SupervisorHandle;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: SupervisorHandle,
    pub health: HealthRegistry,
    pub actor_system_name: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/test/initialize", post(initialize))
        .route("/api/v1/test/start", post(start))
        .route("/api/v1/test/:test_id/status", get(status))
        .route("/api/v1/test/:test_id/cancel", post(cancel))
        .route("/api/v1/queue", get(queue_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Response {
    let health = state.health.get_status();
    let timestamp = time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();

    let (code, status, error) = if health.healthy {
        (StatusCode::OK, "healthy", None)
    } else {
        let stalled: Vec<String> = health
            .components
            .iter()
            .map(|(name, status)| format!("{}={}", name, status.as_str()))
            .collect();
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "unhealthy",
            Some(stalled.join(", ")),
        )
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            actor_system: state.actor_system_name.clone(),
            timestamp,
            error,
        }),
    )
        .into_response()
}

async fn initialize(
    State(state): State<AppState>,
) -> Result<Json<InitializeResponse>, OrchestratorError> {
    let test_id = state.supervisor.initialize().await?;
    Ok(Json(InitializeResponse { test_id }))
}

async fn start(
    State(state): State<AppState>,
    request: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Response, OrchestratorError> {
    let Json(request) =
        request.map_err(|rejection| OrchestratorError::BadRequest(rejection.to_string()))?;

    let message = state
        .supervisor
        .start(request.test_id, request.block_storage_path, None)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            test_id: request.test_id,
            accepted: true,
            test_type: request.test_type,
            message,
        }),
    )
        .into_response())
}

async fn status(
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<TestStatusResponse>, OrchestratorError> {
    let test_id = parse_test_id(&test_id)?;
    match state.supervisor.status(test_id).await? {
        Some(status) => Ok(Json(status.to_response())),
        None => Err(OrchestratorError::TestNotFound(test_id.to_string())),
    }
}

async fn cancel(
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<CancelResponse>, OrchestratorError> {
    let test_id = parse_test_id(&test_id)?;
    match state.supervisor.cancel(test_id).await? {
        CancelResult::Cancelled { message } => Ok(Json(CancelResponse {
            test_id,
            cancelled: true,
            message: Some(message),
        })),
        CancelResult::NotCancelled { message } => Ok(Json(CancelResponse {
            test_id,
            cancelled: false,
            message: Some(message),
        })),
        CancelResult::NotFound => Err(OrchestratorError::TestNotFound(test_id.to_string())),
    }
}

async fn queue_status(
    State(state): State<AppState>,
) -> Result<Json<probe_common::api::QueueStatusResponse>, OrchestratorError> {
    Ok(Json(state.supervisor.queue_status().await?))
}

fn parse_test_id(raw: &str) -> Result<TestId, OrchestratorError> {
    TestId::from_str(raw).map_err(|_| OrchestratorError::TestNotFound(raw.to_string()))
}
