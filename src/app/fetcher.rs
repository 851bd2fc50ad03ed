//! Adaptive window fetcher.
//!
//! Walks a target block range left to right with a variable-size window.
//! A window whose result count reaches the provider cap may be truncated, so
//! it is discarded and re-queried at half the size. Windows that come back
//! below the cap are accepted and the size grows back toward the default.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::domain::{AppError, BlockRange, ExplorerError, FetchOutcome, LedgerExplorer, TransferRecord};

use super::rate_budget::RateBudget;
use super::retry::RetryPolicy;
use super::status::StatusTracker;

/// Window sizing bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    /// Starting and maximum window size in blocks
    pub default_window: u64,
    /// Smallest window the fetcher will shrink to
    pub min_window: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            default_window: 5_000,
            min_window: 100,
        }
    }
}

impl WindowConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        use std::env;

        let default_window = env::var("DEFAULT_WINDOW_BLOCKS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &u64| *v > 0)
            .unwrap_or(5_000);

        let min_window = env::var("MIN_WINDOW_BLOCKS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &u64| *v > 0)
            .unwrap_or(100);

        Self {
            default_window,
            min_window: min_window.min(default_window),
        }
    }
}

/// Result of walking one target range
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchReport {
    /// Records of every accepted window, in window order
    pub records: Vec<TransferRecord>,
    /// Windows that were accepted (including empty ones)
    pub covered: Vec<BlockRange>,
    /// Windows abandoned after exhausting retries
    pub skipped: Vec<BlockRange>,
    /// Windows accepted at the minimum size while still at the cap
    pub capped_at_min: Vec<BlockRange>,
    /// Shutdown was requested before the target was fully walked
    pub interrupted: bool,
}

impl FetchReport {
    /// True when every block of the target was accepted
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.interrupted && self.skipped.is_empty()
    }
}

/// Sleep for `duration` unless shutdown is signalled first.
///
/// Returns `true` when shutdown has been requested.
pub async fn interruptible_sleep(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    if duration.is_zero() {
        return false;
    }
    let sender_gone = tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err(),
    };
    sender_gone || *shutdown.borrow()
}

/// One step of a [`RangeWalk`]
#[derive(Debug, Clone, PartialEq)]
pub enum WindowStep {
    /// Window answered below the cap (or at the cap at minimum size)
    Accepted {
        window: BlockRange,
        records: Vec<TransferRecord>,
        capped_at_min: bool,
    },
    /// Window abandoned after exhausting retries
    Skipped(BlockRange),
    /// Shutdown requested; the walk must not be resumed
    Interrupted,
}

/// Cursor state of a left-to-right walk over a target range
#[derive(Debug, Clone)]
pub struct RangeWalk {
    target: BlockRange,
    /// `None` once the target end has been passed
    cursor: Option<u64>,
    size: u64,
    max_size: u64,
    attempts: u32,
}

impl RangeWalk {
    #[must_use]
    pub fn target(&self) -> BlockRange {
        self.target
    }

    /// Next block to be queried, if any
    #[must_use]
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// Current window size in blocks
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    fn advance_past(&mut self, window: BlockRange, grow: bool) {
        self.attempts = 0;
        self.cursor = window
            .end()
            .checked_add(1)
            .filter(|next| *next <= self.target.end());
        if grow {
            self.size = self.size.saturating_mul(2).min(self.max_size);
        }
    }
}

/// Fetches every record of a block range within the provider's result cap
pub struct AdaptiveWindowFetcher {
    explorer: Arc<dyn LedgerExplorer>,
    budget: Arc<RateBudget>,
    window: WindowConfig,
    retry: RetryPolicy,
    status: Option<Arc<StatusTracker>>,
}

impl AdaptiveWindowFetcher {
    #[must_use]
    pub fn new(
        explorer: Arc<dyn LedgerExplorer>,
        budget: Arc<RateBudget>,
        window: WindowConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            explorer,
            budget,
            window,
            retry,
            status: None,
        }
    }

    /// Report window progress to a status tracker (builder pattern)
    #[must_use]
    pub fn with_status(mut self, status: Arc<StatusTracker>) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn window_config(&self) -> &WindowConfig {
        &self.window
    }

    /// Start a walk over `target` at the default window size
    #[must_use]
    pub fn walk(&self, target: BlockRange) -> RangeWalk {
        RangeWalk {
            target,
            cursor: Some(target.start()),
            size: self.window.default_window,
            max_size: self.window.default_window,
            attempts: 0,
        }
    }

    /// Drive `walk` until one window is accepted or skipped.
    ///
    /// Returns `None` when the whole target has been walked. A fatal explorer
    /// response aborts with an error.
    pub async fn next_window(
        &self,
        walk: &mut RangeWalk,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<WindowStep>, AppError> {
        loop {
            let Some(cursor) = walk.cursor else {
                return Ok(None);
            };
            if *shutdown.borrow() {
                info!(cursor = %cursor, "Shutdown requested, stopping fetch");
                return Ok(Some(WindowStep::Interrupted));
            }
            let Some(window) = walk.target.window(cursor, walk.size) else {
                walk.cursor = None;
                return Ok(None);
            };

            if let Some(status) = &self.status {
                status.window_started(window, walk.target);
            }

            let id = self.budget.acquire().await;
            let outcome = self
                .explorer
                .fetch_transfers(window, self.budget.api_key(id))
                .await;

            match outcome {
                FetchOutcome::Ok { at_cap: true, .. } if window.len() > self.window.min_window => {
                    self.budget.record_success();
                    // Halve what was actually queried; the target may have clipped it.
                    walk.size = (window.len() / 2).max(self.window.min_window);
                    walk.attempts = 0;
                    debug!(window = %window, next_size = walk.size, "Window at result cap, shrinking");
                }
                FetchOutcome::Ok { records, at_cap } => {
                    self.budget.record_success();
                    if at_cap {
                        warn!(
                            window = %window,
                            count = records.len(),
                            "Window still at result cap at minimum size, records may be missing"
                        );
                    }
                    return Ok(Some(self.accept(walk, window, records, at_cap)));
                }
                FetchOutcome::Empty => {
                    self.budget.record_success();
                    return Ok(Some(self.accept(walk, window, Vec::new(), false)));
                }
                FetchOutcome::RateLimited => {
                    let cooldown = self.budget.record_rate_limited();
                    self.budget.rotate();
                    if interruptible_sleep(cooldown, shutdown).await {
                        return Ok(Some(WindowStep::Interrupted));
                    }
                }
                FetchOutcome::TransientError(message) => {
                    walk.attempts += 1;
                    if self.retry.should_retry(walk.attempts) {
                        let delay = self.retry.jittered_delay_for(walk.attempts);
                        warn!(
                            window = %window,
                            attempt = walk.attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "Transient explorer error, retrying"
                        );
                        if interruptible_sleep(delay, shutdown).await {
                            return Ok(Some(WindowStep::Interrupted));
                        }
                        continue;
                    }

                    warn!(
                        window = %window,
                        attempts = walk.attempts,
                        error = %message,
                        "Retries exhausted, skipping window"
                    );
                    if let Some(status) = &self.status {
                        status.record_error(format!("skipped {}: {}", window, message));
                    }
                    walk.advance_past(window, false);
                    return Ok(Some(WindowStep::Skipped(window)));
                }
                FetchOutcome::FatalError(message) => {
                    return Err(AppError::Explorer(ExplorerError::Fatal(message)));
                }
            }
        }
    }

    fn accept(
        &self,
        walk: &mut RangeWalk,
        window: BlockRange,
        records: Vec<TransferRecord>,
        capped_at_min: bool,
    ) -> WindowStep {
        debug!(window = %window, count = records.len(), "Window accepted");
        if let Some(status) = &self.status {
            status.add_fetched(records.len());
        }
        walk.advance_past(window, true);
        WindowStep::Accepted {
            window,
            records,
            capped_at_min,
        }
    }

    /// Walk all of `target` and collect the result.
    ///
    /// Returns early with `interrupted` set when shutdown is signalled.
    #[instrument(skip(self, shutdown), fields(target = %target))]
    pub async fn fetch_range(
        &self,
        target: BlockRange,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<FetchReport, AppError> {
        let mut report = FetchReport::default();
        let mut walk = self.walk(target);

        while let Some(step) = self.next_window(&mut walk, shutdown).await? {
            match step {
                WindowStep::Accepted {
                    window,
                    records,
                    capped_at_min,
                } => {
                    if capped_at_min {
                        report.capped_at_min.push(window);
                    }
                    report.records.extend(records);
                    report.covered.push(window);
                }
                WindowStep::Skipped(window) => report.skipped.push(window),
                WindowStep::Interrupted => {
                    report.interrupted = true;
                    break;
                }
            }
        }

        info!(
            records = report.records.len(),
            windows = report.covered.len(),
            skipped = report.skipped.len(),
            interrupted = report.interrupted,
            "Range fetch finished"
        );
        Ok(report)
    }
}
