//! Router tests for the status API.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use ledger_sync::api::create_router;
use ledger_sync::app::{AppState, SharedStatus};
use ledger_sync::domain::{StatusReporter, SyncPhase, SyncStatus};

fn status(phase: SyncPhase) -> SyncStatus {
    SyncStatus {
        is_running: phase != SyncPhase::Stopped,
        phase,
        last_update: chrono::Utc::now(),
        current_block: 38_700_000,
        target_block: 38_705_000,
        records_fetched: 1_234,
        total_records: 50_000,
        gaps_remaining: 2,
        api_requests: 321,
        errors: vec![],
        last_activity: "fetching [38700000, 38704999]".to_string(),
        uptime_seconds: 600,
        requests_per_minute: 32.1,
        checkpoint: Some(38_699_999),
        chain_head: Some(38_800_000),
        blocks_behind: Some(100_001),
        sync_percentage: Some(0.6),
    }
}

fn state_with(phase: Option<SyncPhase>) -> Arc<AppState> {
    let shared = Arc::new(SharedStatus::new());
    if let Some(phase) = phase {
        shared.report(&status(phase));
    }
    Arc::new(AppState::new(shared))
}

async fn get(state: Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = create_router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_is_healthy_while_syncing() {
    let (code, body) = get(state_with(Some(SyncPhase::FillingGaps)), "/health").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["phase"], "filling_gaps");
}

#[tokio::test]
async fn test_health_is_degraded_in_error_cooldown() {
    let (_, body) = get(state_with(Some(SyncPhase::Error)), "/health").await;
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn test_health_is_unhealthy_before_first_report() {
    let (code, body) = get(state_with(None), "/health").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "unhealthy");
    assert!(body["phase"].is_null());
}

#[tokio::test]
async fn test_status_returns_latest_snapshot() {
    let (code, body) = get(state_with(Some(SyncPhase::ExtendingToHead)), "/status").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["phase"], "extending_to_head");
    assert_eq!(body["total_records"], 50_000);
    assert_eq!(body["checkpoint"], 38_699_999);
    assert_eq!(body["gaps_remaining"], 2);
}

#[tokio::test]
async fn test_status_not_ready_before_first_report() {
    let (code, body) = get(state_with(None), "/status").await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["type"], "not_ready");
}

#[tokio::test]
async fn test_openapi_document_lists_endpoints() {
    let (code, body) = get(state_with(None), "/api-docs/openapi.json").await;
    assert_eq!(code, StatusCode::OK);
    assert!(body["paths"]["/health"].is_object());
    assert!(body["paths"]["/status"].is_object());
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (code, _) = get(state_with(None), "/transfers").await;
    assert_eq!(code, StatusCode::NOT_FOUND);
}
