//! Infrastructure layer implementations.

pub mod explorer;
pub mod status;
pub mod store;

pub use explorer::{EtherscanClient, ExplorerConfig};
pub use status::FileStatusReporter;
pub use store::{JsonFileStore, RecordIndex, StagedWrite, checkpoint, merge};
