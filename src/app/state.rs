//! Application state management.

use std::sync::Arc;

use crate::domain::{HealthResponse, SyncStatus};

use super::status::SharedStatus;

/// Shared state of the status API
#[derive(Clone)]
pub struct AppState {
    /// Latest snapshot published by the sync loop
    pub status: Arc<SharedStatus>,
}

impl AppState {
    #[must_use]
    pub fn new(status: Arc<SharedStatus>) -> Self {
        Self { status }
    }

    #[must_use]
    pub fn latest_status(&self) -> Option<SyncStatus> {
        self.status.latest()
    }

    #[must_use]
    pub fn health(&self) -> HealthResponse {
        HealthResponse::from_phase(self.latest_status().map(|s| s.phase))
    }
}
