//! Token transfer ledger synchronization engine.
//!
//! Mirrors every transfer of one token from an Etherscan-compatible explorer
//! API into a local, deduplicated, crash-safe JSON store, adapting query
//! windows to the provider's per-query result cap and backfilling gaps.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
