//! Mock implementations for testing.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::domain::{
    AppError, BlockRange, ExplorerError, FetchOutcome, LedgerExplorer, RecordStore,
    StatusReporter, StoreError, SyncPhase, SyncStatus, TransferRecord,
};

/// A range that keeps failing with a transient error
#[derive(Debug, Clone)]
struct FailingRange {
    range: BlockRange,
    /// `None` fails forever
    remaining: Option<u32>,
}

/// Mock explorer serving a synthetic ledger.
///
/// Queries are answered from an in-memory list of transfers, truncated to
/// `max_results` like a real provider. Scripted outcomes take precedence and
/// are consumed in order.
pub struct MockLedgerExplorer {
    ledger: Mutex<Vec<TransferRecord>>,
    max_results: usize,
    cap_margin: usize,
    scripted: Mutex<VecDeque<FetchOutcome>>,
    failing: Mutex<Vec<FailingRange>>,
    calls: Mutex<Vec<BlockRange>>,
    keys_used: Mutex<Vec<String>>,
    head: AtomicU64,
    head_fails: AtomicBool,
}

impl MockLedgerExplorer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Vec::new()),
            max_results: 10_000,
            cap_margin: 0,
            scripted: Mutex::new(VecDeque::new()),
            failing: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            keys_used: Mutex::new(Vec::new()),
            head: AtomicU64::new(0),
            head_fails: AtomicBool::new(false),
        }
    }

    /// Results at or above `max_results - cap_margin` report `at_cap`
    #[must_use]
    pub fn with_cap(mut self, max_results: usize, cap_margin: usize) -> Self {
        self.max_results = max_results;
        self.cap_margin = cap_margin;
        self
    }

    /// Build a transfer record for the synthetic ledger
    #[must_use]
    pub fn transfer(hash: &str, block: u64) -> TransferRecord {
        TransferRecord::from_raw(
            hash,
            "0xSender",
            "0xReceiver",
            "1000000000000000000",
            block,
            1_700_000_000 + block,
            18,
        )
        .unwrap()
    }

    pub fn push_record(&self, record: TransferRecord) {
        self.ledger.lock().unwrap().push(record);
    }

    /// One transfer every `step` blocks over `[start, end]`
    pub fn add_transfers_every(&self, start: u64, end: u64, step: u64) {
        let mut ledger = self.ledger.lock().unwrap();
        let mut block = start;
        while block <= end {
            ledger.push(Self::transfer(&format!("0x{:064x}", block), block));
            block += step;
        }
    }

    /// Queue an outcome returned by the next query, regardless of range
    pub fn script(&self, outcome: FetchOutcome) {
        self.scripted.lock().unwrap().push_back(outcome);
    }

    /// Make queries intersecting `range` fail transiently, `times` times or
    /// forever
    pub fn fail_range(&self, range: BlockRange, times: Option<u32>) {
        self.failing.lock().unwrap().push(FailingRange {
            range,
            remaining: times,
        });
    }

    pub fn set_chain_head(&self, head: u64) {
        self.head.store(head, Ordering::Relaxed);
    }

    pub fn set_chain_head_fails(&self, fails: bool) {
        self.head_fails.store(fails, Ordering::Relaxed);
    }

    /// Ranges queried so far, in order
    pub fn calls(&self) -> Vec<BlockRange> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// API keys presented so far, in order
    pub fn keys_used(&self) -> Vec<String> {
        self.keys_used.lock().unwrap().clone()
    }

    /// Every record of the synthetic ledger
    pub fn ledger(&self) -> Vec<TransferRecord> {
        self.ledger.lock().unwrap().clone()
    }

    fn take_failure(&self, range: &BlockRange) -> bool {
        let mut failing = self.failing.lock().unwrap();
        for entry in failing.iter_mut() {
            if entry.range.intersect(range).is_none() {
                continue;
            }
            match entry.remaining.as_mut() {
                None => return true,
                Some(0) => continue,
                Some(n) => {
                    *n -= 1;
                    return true;
                }
            }
        }
        false
    }
}

impl Default for MockLedgerExplorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerExplorer for MockLedgerExplorer {
    async fn fetch_transfers(&self, range: BlockRange, api_key: &SecretString) -> FetchOutcome {
        self.calls.lock().unwrap().push(range);
        self.keys_used
            .lock()
            .unwrap()
            .push(api_key.expose_secret().to_string());

        if let Some(outcome) = self.scripted.lock().unwrap().pop_front() {
            return outcome;
        }
        if self.take_failure(&range) {
            return FetchOutcome::TransientError("mock transient failure".to_string());
        }

        let mut records: Vec<TransferRecord> = self
            .ledger
            .lock()
            .unwrap()
            .iter()
            .filter(|r| range.contains(r.block_number))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.block_number);

        if records.is_empty() {
            return FetchOutcome::Empty;
        }

        let threshold = self.max_results.saturating_sub(self.cap_margin).max(1);
        let at_cap = records.len() >= threshold;
        records.truncate(self.max_results);
        FetchOutcome::Ok { records, at_cap }
    }

    async fn chain_head(&self, _api_key: &SecretString) -> Result<u64, AppError> {
        if self.head_fails.load(Ordering::Relaxed) {
            return Err(AppError::Explorer(ExplorerError::Network(
                "mock chain head unavailable".to_string(),
            )));
        }
        Ok(self.head.load(Ordering::Relaxed))
    }
}

/// In-memory record store
pub struct MockRecordStore {
    records: Mutex<Vec<TransferRecord>>,
    fail_persist: AtomicBool,
    persist_count: AtomicUsize,
}

impl MockRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    #[must_use]
    pub fn with_records(records: Vec<TransferRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            fail_persist: AtomicBool::new(false),
            persist_count: AtomicUsize::new(0),
        }
    }

    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::Relaxed);
    }

    /// Currently persisted records (for testing)
    pub fn snapshot(&self) -> Vec<TransferRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Number of successful persists
    pub fn persist_count(&self) -> usize {
        self.persist_count.load(Ordering::Relaxed)
    }
}

impl Default for MockRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MockRecordStore {
    async fn load(&self) -> Result<Vec<TransferRecord>, AppError> {
        Ok(self.records.lock().unwrap().clone())
    }

    async fn persist(&self, records: &[TransferRecord]) -> Result<(), AppError> {
        if self.fail_persist.load(Ordering::Relaxed) {
            return Err(AppError::Store(StoreError::Io {
                path: "mock".to_string(),
                message: "disk full".to_string(),
            }));
        }
        *self.records.lock().unwrap() = records.to_vec();
        self.persist_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Status reporter recording every snapshot it receives
#[derive(Default)]
pub struct RecordingStatusReporter {
    statuses: Mutex<Vec<SyncStatus>>,
}

impl RecordingStatusReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<SyncStatus> {
        self.statuses.lock().unwrap().clone()
    }

    /// Distinct phases in the order they were first entered after a change
    pub fn phases(&self) -> Vec<SyncPhase> {
        let mut phases: Vec<SyncPhase> = Vec::new();
        for status in self.statuses.lock().unwrap().iter() {
            if phases.last() != Some(&status.phase) {
                phases.push(status.phase);
            }
        }
        phases
    }

    pub fn last(&self) -> Option<SyncStatus> {
        self.statuses.lock().unwrap().last().cloned()
    }
}

impl StatusReporter for RecordingStatusReporter {
    fn report(&self, status: &SyncStatus) {
        self.statuses.lock().unwrap().push(status.clone());
    }
}
