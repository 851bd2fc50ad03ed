//! Ledger explorer API clients.

pub mod etherscan;

pub use etherscan::{
    DEFAULT_CAP_MARGIN, DEFAULT_EXPLORER_API_URL, DEFAULT_MAX_RESULTS, EtherscanClient,
    ExplorerConfig,
};
