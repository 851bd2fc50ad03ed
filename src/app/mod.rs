//! Application layer: the synchronization engine and its shared state.

pub mod fetcher;
pub mod gaps;
pub mod rate_budget;
pub mod retry;
pub mod state;
pub mod status;
pub mod sync;
pub mod worker;

pub use fetcher::{AdaptiveWindowFetcher, FetchReport, RangeWalk, WindowConfig, WindowStep};
pub use gaps::{coalesce, find_gaps, find_record_gaps};
pub use rate_budget::{CredentialState, RateBudget, RateBudgetConfig};
pub use retry::RetryPolicy;
pub use state::AppState;
pub use status::{SharedStatus, StatusTracker};
pub use sync::{CycleOutcome, SyncConfig, SyncService};
pub use worker::spawn_sync_worker;
