//! Domain layer containing core types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{AppError, ConfigError, ExplorerError, StoreError};
pub use traits::{LedgerExplorer, RecordStore, StatusReporter};
pub use types::{
    BlockRange, CredentialId, ErrorDetail, ErrorResponse, FetchOutcome, Gap, HealthResponse,
    HealthStatus, SyncPhase, SyncStatus, TransferRecord, format_units,
};
