//! Synchronization loop.
//!
//! Each cycle loads the persisted store, backfills the intervals the gap
//! detector reports, extends coverage from the checkpoint to the chain head,
//! and persists. The checkpoint is always derived from the store, so a crash
//! at any point resumes from whatever was last persisted.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::domain::{
    AppError, BlockRange, ExplorerError, LedgerExplorer, RecordStore, SyncPhase, TransferRecord,
};
use crate::infra::store::{RecordIndex, checkpoint};

use super::fetcher::{AdaptiveWindowFetcher, WindowConfig, WindowStep, interruptible_sleep};
use super::gaps::{coalesce, find_record_gaps};
use super::rate_budget::RateBudget;
use super::retry::RetryPolicy;
use super::status::StatusTracker;

/// Configuration for the synchronization loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// First block that can hold a transfer of the tracked token
    pub origin: u64,
    /// Silence between observed blocks above this is treated as a gap
    pub gap_tolerance: u64,
    pub caught_up_tolerance: u64,
    pub caught_up_sleep: Duration,
    pub continue_delay: Duration,
    pub error_cooldown: Duration,
    pub fatal_cooldown: Duration,
    /// Persist once this many new records have accumulated in memory
    pub persist_batch_threshold: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            origin: 0,
            gap_tolerance: 1_000,
            caught_up_tolerance: 100,
            caught_up_sleep: Duration::from_secs(60),
            continue_delay: Duration::from_secs(5),
            error_cooldown: Duration::from_secs(30),
            fatal_cooldown: Duration::from_secs(300),
            persist_batch_threshold: 10_000,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        use std::env;

        fn var<T: std::str::FromStr>(key: &str, default: T) -> T {
            env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        Self {
            origin: var("TOKEN_START_BLOCK", 0),
            gap_tolerance: var("GAP_TOLERANCE_BLOCKS", 1_000),
            caught_up_tolerance: var("CAUGHT_UP_TOLERANCE_BLOCKS", 100),
            caught_up_sleep: Duration::from_secs(var("CAUGHT_UP_SLEEP_SECS", 60)),
            continue_delay: Duration::from_secs(var("CONTINUE_DELAY_SECS", 5)),
            error_cooldown: Duration::from_secs(var("ERROR_COOLDOWN_SECS", 30)),
            fatal_cooldown: Duration::from_secs(var("FATAL_COOLDOWN_SECS", 300)),
            persist_batch_threshold: var("PERSIST_BATCH_THRESHOLD", 10_000_usize).max(1),
        }
    }
}

/// How a single cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Store is within tolerance of the chain head
    CaughtUp,
    /// More work remains; run again after the short delay
    MorePending,
    /// Shutdown was requested mid-cycle; everything merged so far is persisted
    Interrupted,
}

/// How a walk over one target ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkEnd {
    Completed { skipped: usize },
    Interrupted,
}

/// In-memory working set of one cycle
struct Working {
    records: Vec<TransferRecord>,
    index: RecordIndex,
    unpersisted: usize,
}

/// The synchronization engine
pub struct SyncService {
    config: SyncConfig,
    explorer: Arc<dyn LedgerExplorer>,
    store: Arc<dyn RecordStore>,
    budget: Arc<RateBudget>,
    retry: RetryPolicy,
    fetcher: AdaptiveWindowFetcher,
    status: Arc<StatusTracker>,
    /// Windows skipped after exhausted retries, re-offered next cycle
    retry_debt: Mutex<Vec<BlockRange>>,
}

impl SyncService {
    #[must_use]
    pub fn new(
        config: SyncConfig,
        explorer: Arc<dyn LedgerExplorer>,
        store: Arc<dyn RecordStore>,
        budget: Arc<RateBudget>,
        window: WindowConfig,
        retry: RetryPolicy,
        status: Arc<StatusTracker>,
    ) -> Self {
        let fetcher = AdaptiveWindowFetcher::new(
            Arc::clone(&explorer),
            Arc::clone(&budget),
            window,
            retry.clone(),
        )
        .with_status(Arc::clone(&status));

        Self {
            config,
            explorer,
            store,
            budget,
            retry,
            fetcher,
            status,
            retry_debt: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn status(&self) -> &Arc<StatusTracker> {
        &self.status
    }

    /// Ranges currently waiting for another attempt
    #[must_use]
    pub fn retry_debt(&self) -> Vec<BlockRange> {
        self.retry_debt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn take_retry_debt(&self) -> Vec<BlockRange> {
        std::mem::take(&mut *self.retry_debt.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn add_retry_debt(&self, ranges: &[BlockRange]) {
        if ranges.is_empty() {
            return;
        }
        let mut debt = self.retry_debt.lock().unwrap_or_else(|e| e.into_inner());
        debt.extend_from_slice(ranges);
        let merged = coalesce(std::mem::take(&mut *debt));
        *debt = merged;
    }

    /// Run the loop until shutdown is signalled
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(origin = self.config.origin, "Sync loop started");
        self.status.set_running(true);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.run_cycle(&mut shutdown).await {
                Ok(CycleOutcome::CaughtUp) => {
                    self.status
                        .set_phase(SyncPhase::CaughtUp, "caught up with chain head");
                    self.config.caught_up_sleep
                }
                Ok(CycleOutcome::MorePending) => self.config.continue_delay,
                Ok(CycleOutcome::Interrupted) => break,
                Err(e) => {
                    let cooldown = if e.is_fatal() {
                        self.config.fatal_cooldown
                    } else {
                        self.config.error_cooldown
                    };
                    error!(
                        error = %e,
                        fatal = e.is_fatal(),
                        cooldown_secs = cooldown.as_secs(),
                        "Sync cycle failed"
                    );
                    self.status.record_error(e.to_string());
                    self.status.set_phase(
                        SyncPhase::Error,
                        format!("cooling down for {}s", cooldown.as_secs()),
                    );
                    cooldown
                }
            };

            if interruptible_sleep(delay, &mut shutdown).await {
                break;
            }
        }

        self.status.set_phase(SyncPhase::Stopped, "stopped");
        self.status.set_running(false);
        info!("Sync loop stopped");
    }

    /// Run one full cycle: load, fill gaps, extend to head, persist.
    #[instrument(skip(self, shutdown))]
    pub async fn run_cycle(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<CycleOutcome, AppError> {
        // Starting
        self.status
            .set_phase(SyncPhase::Starting, "loading record store");
        let mut records = self.store.load().await?;
        let index = RecordIndex::build(&mut records);
        let mut working = Working {
            records,
            index,
            unpersisted: 0,
        };
        self.status
            .set_store_totals(working.records.len(), checkpoint(&working.records));

        let Some(head) = self.fetch_chain_head(shutdown).await? else {
            return Ok(CycleOutcome::Interrupted);
        };
        self.status.set_chain_head(head);
        info!(
            chain_head = head,
            records = working.records.len(),
            checkpoint = ?checkpoint(&working.records),
            "Cycle starting"
        );

        // FillingGaps
        let debt = self.take_retry_debt();
        let mut gaps = debt.clone();
        gaps.extend(find_record_gaps(
            &working.records,
            self.config.origin,
            self.config.gap_tolerance,
        ));
        let gaps: Vec<BlockRange> = coalesce(gaps)
            .into_iter()
            .filter_map(|gap| gap.intersect(&BlockRange::new(self.config.origin, head).ok()?))
            .collect();

        let filled = self.fill_gaps(&gaps, shutdown, &mut working).await;
        if !matches!(filled, Ok(WalkEnd::Completed { .. })) {
            // Debt narrower than the gap tolerance is invisible to the
            // detector, so it stays owed until a gap phase completes.
            self.add_retry_debt(&debt);
        }
        if filled? == WalkEnd::Interrupted {
            return Ok(CycleOutcome::Interrupted);
        }

        // ExtendingToHead
        let start = checkpoint(&working.records)
            .map_or(self.config.origin, |c| c.saturating_add(1))
            .max(self.config.origin);

        let mut extension_complete = true;
        if start <= head {
            let target = BlockRange::new(start, head)?;
            self.status.set_phase(
                SyncPhase::ExtendingToHead,
                format!("extending {}", target),
            );
            let end = self.fetch(target, shutdown, &mut working).await?;
            self.flush(&mut working).await?;
            match end {
                WalkEnd::Interrupted => return Ok(CycleOutcome::Interrupted),
                WalkEnd::Completed { skipped } => extension_complete = skipped == 0,
            }
        }

        let latest = checkpoint(&working.records);
        let within_tolerance = latest
            .is_some_and(|c| c.saturating_add(self.config.caught_up_tolerance) >= head);
        let debt_outstanding = !self.retry_debt().is_empty();

        let outcome = if !debt_outstanding && (within_tolerance || extension_complete) {
            CycleOutcome::CaughtUp
        } else {
            CycleOutcome::MorePending
        };

        info!(
            outcome = ?outcome,
            checkpoint = ?latest,
            chain_head = head,
            total_records = working.records.len(),
            "Cycle finished"
        );
        Ok(outcome)
    }

    /// Walk every gap in order and persist at the end of the phase
    async fn fill_gaps(
        &self,
        gaps: &[BlockRange],
        shutdown: &mut watch::Receiver<bool>,
        working: &mut Working,
    ) -> Result<WalkEnd, AppError> {
        if gaps.is_empty() {
            self.status.set_gaps_remaining(0);
            return Ok(WalkEnd::Completed { skipped: 0 });
        }

        self.status.set_phase(
            SyncPhase::FillingGaps,
            format!("filling {} gaps", gaps.len()),
        );
        info!(gaps = gaps.len(), "Filling gaps");

        let mut skipped = 0;
        for (i, gap) in gaps.iter().enumerate() {
            self.status.set_gaps_remaining(gaps.len() - i);
            match self.fetch(*gap, shutdown, working).await? {
                WalkEnd::Completed { skipped: s } => skipped += s,
                WalkEnd::Interrupted => {
                    self.flush(working).await?;
                    return Ok(WalkEnd::Interrupted);
                }
            }
        }
        self.status.set_gaps_remaining(0);
        self.flush(working).await?;
        Ok(WalkEnd::Completed { skipped })
    }

    /// Walk `target`, merging every accepted window and persisting whenever
    /// the batch threshold is reached. Records merged before a fatal error
    /// are persisted before the error is returned.
    async fn fetch(
        &self,
        target: BlockRange,
        shutdown: &mut watch::Receiver<bool>,
        working: &mut Working,
    ) -> Result<WalkEnd, AppError> {
        let mut walk = self.fetcher.walk(target);
        let mut skipped = 0_usize;

        loop {
            let step = match self.fetcher.next_window(&mut walk, shutdown).await {
                Ok(Some(step)) => step,
                Ok(None) => break,
                Err(e) => {
                    if let Err(persist_err) = self.flush(working).await {
                        warn!(error = %persist_err, "Failed to persist before aborting cycle");
                    }
                    return Err(e);
                }
            };

            match step {
                WindowStep::Accepted {
                    window,
                    records,
                    capped_at_min,
                } => {
                    if capped_at_min {
                        self.status.record_error(format!(
                            "window {} still at result cap at minimum size",
                            window
                        ));
                    }
                    let added = working.index.merge_into(&mut working.records, records);
                    working.unpersisted += added;
                    self.status
                        .set_store_totals(working.records.len(), checkpoint(&working.records));

                    if working.unpersisted >= self.config.persist_batch_threshold {
                        self.flush(working).await?;
                    }
                }
                WindowStep::Skipped(window) => {
                    skipped += 1;
                    self.add_retry_debt(&[window]);
                }
                WindowStep::Interrupted => return Ok(WalkEnd::Interrupted),
            }
        }

        Ok(WalkEnd::Completed { skipped })
    }

    /// Persist the working set if it holds unpersisted records
    async fn flush(&self, working: &mut Working) -> Result<(), AppError> {
        if working.unpersisted == 0 {
            return Ok(());
        }
        self.store.persist(&working.records).await?;
        info!(
            added = working.unpersisted,
            total = working.records.len(),
            "Record store persisted"
        );
        working.unpersisted = 0;
        Ok(())
    }

    /// Query the chain head, rotating on rate limits and retrying transient
    /// failures. Returns `None` when shutdown interrupts the wait.
    async fn fetch_chain_head(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<u64>, AppError> {
        let mut attempts = 0_u32;
        loop {
            let id = self.budget.acquire().await;
            let error = match self.explorer.chain_head(self.budget.api_key(id)).await {
                Ok(head) => {
                    self.budget.record_success();
                    return Ok(Some(head));
                }
                Err(e) => e,
            };

            if error.is_fatal() {
                return Err(error);
            }
            let delay = if matches!(error, AppError::Explorer(ExplorerError::RateLimited(_))) {
                let cooldown = self.budget.record_rate_limited();
                self.budget.rotate();
                cooldown
            } else {
                attempts += 1;
                if !self.retry.should_retry(attempts) {
                    return Err(error);
                }
                warn!(error = %error, attempt = attempts, "Chain head query failed, retrying");
                self.retry.jittered_delay_for(attempts)
            };

            if interruptible_sleep(delay, shutdown).await {
                return Ok(None);
            }
        }
    }
}
