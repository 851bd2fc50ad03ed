//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use secrecy::SecretString;

use super::error::AppError;
use super::types::{BlockRange, FetchOutcome, SyncStatus, TransferRecord};

/// Ledger explorer API: bounded range queries plus the chain head.
///
/// Implementations are pure adapters. They never retry or sleep; throttling
/// and retry decisions belong to the caller.
#[async_trait]
pub trait LedgerExplorer: Send + Sync {
    /// Query all transfers of the tracked token in `range`
    async fn fetch_transfers(&self, range: BlockRange, api_key: &SecretString) -> FetchOutcome;

    /// Current block number known to the provider
    async fn chain_head(&self, api_key: &SecretString) -> Result<u64, AppError>;
}

/// Durable, content-addressed collection of transfer records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load every persisted record in stored order
    async fn load(&self) -> Result<Vec<TransferRecord>, AppError>;

    /// Atomically replace the persisted collection.
    ///
    /// On error the previously persisted collection must remain intact.
    async fn persist(&self, records: &[TransferRecord]) -> Result<(), AppError>;
}

/// Sink for loop status snapshots. Write-only from the engine's side.
pub trait StatusReporter: Send + Sync {
    fn report(&self, status: &SyncStatus);
}
