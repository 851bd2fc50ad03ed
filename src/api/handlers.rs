//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use utoipa::OpenApi;

use crate::app::AppState;
use crate::domain::{
    BlockRange, ErrorDetail, ErrorResponse, HealthResponse, HealthStatus, SyncPhase, SyncStatus,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ledger Sync Status API",
        description = "Read-only view of the token transfer synchronization loop",
        license(
            name = "MIT"
        )
    ),
    paths(health_handler, status_handler),
    components(
        schemas(
            HealthResponse,
            HealthStatus,
            SyncStatus,
            SyncPhase,
            BlockRange,
            ErrorResponse,
            ErrorDetail,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sync", description = "Synchronization progress")
    )
)]
pub struct ApiDoc;

/// Health derived from the latest loop phase
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(state.health())
}

/// Latest synchronization status snapshot
#[utoipa::path(
    get,
    path = "/status",
    tag = "sync",
    responses(
        (status = 200, description = "Current sync status", body = SyncStatus),
        (status = 503, description = "Sync loop has not reported yet", body = ErrorResponse)
    )
)]
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SyncStatus>, (StatusCode, Json<ErrorResponse>)> {
    state.latest_status().map(Json).ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: ErrorDetail {
                    r#type: "not_ready".to_string(),
                    message: "Sync loop has not reported a status yet".to_string(),
                },
            }),
        )
    })
}
