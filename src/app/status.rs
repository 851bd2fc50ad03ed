//! Live status of the synchronization loop.
//!
//! The tracker owns the mutable counters and fans snapshots out to every
//! registered [`StatusReporter`]. Reporters are write-only sinks: the engine
//! never reads status back.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::Utc;

use crate::domain::{BlockRange, StatusReporter, SyncPhase, SyncStatus};

use super::rate_budget::RateBudget;

/// Number of recent errors kept in the status
pub const ERROR_TAIL_LEN: usize = 5;

#[derive(Debug, Default)]
struct TrackerState {
    is_running: bool,
    phase: SyncPhase,
    current_block: u64,
    target_block: u64,
    records_fetched: u64,
    total_records: u64,
    gaps_remaining: u64,
    errors: VecDeque<String>,
    last_activity: String,
    checkpoint: Option<u64>,
    chain_head: Option<u64>,
}

/// Collects loop progress and publishes [`SyncStatus`] snapshots
pub struct StatusTracker {
    started: Instant,
    origin: u64,
    budget: Arc<RateBudget>,
    reporters: Vec<Arc<dyn StatusReporter>>,
    inner: Mutex<TrackerState>,
}

impl StatusTracker {
    #[must_use]
    pub fn new(origin: u64, budget: Arc<RateBudget>) -> Self {
        Self {
            started: Instant::now(),
            origin,
            budget,
            reporters: Vec::new(),
            inner: Mutex::new(TrackerState::default()),
        }
    }

    /// Add a reporter (builder pattern)
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    fn update(&self, f: impl FnOnce(&mut TrackerState)) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state);
    }

    pub fn set_running(&self, running: bool) {
        self.update(|s| s.is_running = running);
        self.publish();
    }

    /// Enter `phase` and publish
    pub fn set_phase(&self, phase: SyncPhase, activity: impl Into<String>) {
        let activity = activity.into();
        self.update(|s| {
            s.phase = phase;
            s.last_activity = activity;
        });
        self.publish();
    }

    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).phase
    }

    /// A window inside `target` is about to be queried
    pub fn window_started(&self, window: BlockRange, target: BlockRange) {
        self.update(|s| {
            s.current_block = window.start();
            s.target_block = target.end();
            s.last_activity = format!("fetching {}", window);
        });
        self.publish();
    }

    pub fn add_fetched(&self, count: usize) {
        self.update(|s| s.records_fetched += count as u64);
    }

    /// Record the store size and checkpoint after a merge
    pub fn set_store_totals(&self, total_records: usize, checkpoint: Option<u64>) {
        self.update(|s| {
            s.total_records = total_records as u64;
            s.checkpoint = checkpoint;
        });
    }

    pub fn set_gaps_remaining(&self, gaps: usize) {
        self.update(|s| s.gaps_remaining = gaps as u64);
    }

    pub fn set_chain_head(&self, head: u64) {
        self.update(|s| s.chain_head = Some(head));
    }

    /// Append to the error tail, dropping the oldest beyond [`ERROR_TAIL_LEN`]
    pub fn record_error(&self, message: impl Into<String>) {
        let entry = format!("{}: {}", Utc::now().to_rfc3339(), message.into());
        self.update(|s| {
            s.errors.push_back(entry);
            while s.errors.len() > ERROR_TAIL_LEN {
                s.errors.pop_front();
            }
        });
        self.publish();
    }

    #[must_use]
    pub fn snapshot(&self) -> SyncStatus {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let uptime = self.started.elapsed();
        let api_requests = self.budget.requests_issued();

        let requests_per_minute = if uptime.as_secs_f64() > 0.0 {
            api_requests as f64 * 60.0 / uptime.as_secs_f64().max(1.0)
        } else {
            0.0
        };

        let blocks_behind = state
            .chain_head
            .map(|head| head.saturating_sub(state.checkpoint.unwrap_or(self.origin)));

        let sync_percentage = state
            .chain_head
            .map(|head| sync_percentage(self.origin, state.checkpoint, head));

        SyncStatus {
            is_running: state.is_running,
            phase: state.phase,
            last_update: Utc::now(),
            current_block: state.current_block,
            target_block: state.target_block,
            records_fetched: state.records_fetched,
            total_records: state.total_records,
            gaps_remaining: state.gaps_remaining,
            api_requests,
            errors: state.errors.iter().cloned().collect(),
            last_activity: state.last_activity.clone(),
            uptime_seconds: uptime.as_secs(),
            requests_per_minute,
            checkpoint: state.checkpoint,
            chain_head: state.chain_head,
            blocks_behind,
            sync_percentage,
        }
    }

    /// Push the current snapshot to every reporter
    pub fn publish(&self) {
        if self.reporters.is_empty() {
            return;
        }
        let status = self.snapshot();
        for reporter in &self.reporters {
            reporter.report(&status);
        }
    }
}

/// Share of `[origin, head]` at or below `checkpoint`, in percent
fn sync_percentage(origin: u64, checkpoint: Option<u64>, head: u64) -> f64 {
    let Some(checkpoint) = checkpoint else {
        return 0.0;
    };
    if head <= origin {
        return 100.0;
    }
    let done = checkpoint.saturating_sub(origin) as f64;
    let total = (head - origin) as f64;
    (done / total * 100.0).clamp(0.0, 100.0)
}

/// In-memory reporter holding the latest snapshot for the HTTP surface
#[derive(Debug, Default)]
pub struct SharedStatus {
    latest: RwLock<Option<SyncStatus>>,
}

impl SharedStatus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn latest(&self) -> Option<SyncStatus> {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl StatusReporter for SharedStatus {
    fn report(&self, status: &SyncStatus) {
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = Some(status.clone());
    }
}
