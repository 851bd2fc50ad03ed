//! Test utilities: mock explorer, store and status reporter.

pub mod mocks;

pub use mocks::{MockLedgerExplorer, MockRecordStore, RecordingStatusReporter};
