//! Etherscan-compatible explorer client (Routescan, Basescan, Etherscan v2).
//!
//! Issues `account/tokentx` queries bounded by `startblock`/`endblock` and
//! always on page 1: deep pagination is capped by the provider
//! (`page × offset <= 10000`), so block-range slicing is the only cursor.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use crate::domain::{
    AppError, BlockRange, ConfigError, ExplorerError, FetchOutcome, LedgerExplorer,
    TransferRecord,
};

/// Routescan endpoint for Base mainnet
pub const DEFAULT_EXPLORER_API_URL: &str =
    "https://api.routescan.io/v2/network/mainnet/evm/8453/etherscan/api";

/// Documented maximum results per `tokentx` query
pub const DEFAULT_MAX_RESULTS: usize = 10_000;

/// Counts this close to the maximum are treated as possibly truncated
pub const DEFAULT_CAP_MARGIN: usize = 10;

/// Configuration for the explorer client
#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    pub base_url: String,
    /// Token contract whose transfers are tracked
    pub contract_address: String,
    /// Optional `chainid` parameter for multichain endpoints
    pub chain_id: Option<u64>,
    pub max_results: usize,
    pub cap_margin: usize,
    pub timeout: Duration,
}

impl ExplorerConfig {
    pub fn new(contract_address: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_EXPLORER_API_URL.to_string(),
            contract_address: contract_address.into(),
            chain_id: None,
            max_results: DEFAULT_MAX_RESULTS,
            cap_margin: DEFAULT_CAP_MARGIN,
            timeout: Duration::from_secs(60),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// `TOKEN_ADDRESS` is required; everything else has a default.
    pub fn from_env() -> Result<Self, AppError> {
        use std::env;

        let contract_address = env::var("TOKEN_ADDRESS")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnv("TOKEN_ADDRESS".to_string()))?;

        let base_url =
            env::var("EXPLORER_API_URL").unwrap_or_else(|_| DEFAULT_EXPLORER_API_URL.to_string());

        let chain_id = match env::var("EXPLORER_CHAIN_ID") {
            Ok(v) => Some(v.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: "EXPLORER_CHAIN_ID".to_string(),
                message: e.to_string(),
            })?),
            Err(_) => None,
        };

        let max_results = env::var("MAX_RESULTS_PER_QUERY")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &usize| *v > 0)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let cap_margin = env::var("CAP_MARGIN")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CAP_MARGIN);

        let timeout_secs = env::var("EXPLORER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        Ok(Self {
            base_url,
            contract_address: contract_address.trim().to_string(),
            chain_id,
            max_results,
            cap_margin,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_cap(mut self, max_results: usize, cap_margin: usize) -> Self {
        self.max_results = max_results;
        self.cap_margin = cap_margin;
        self
    }

    /// Smallest result count that counts as "at cap"
    #[must_use]
    pub fn cap_threshold(&self) -> usize {
        self.max_results.saturating_sub(self.cap_margin).max(1)
    }
}

/// Envelope shared by every Etherscan-style response
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Value,
}

/// Raw `tokentx` row; every field is a string on the wire
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransfer {
    hash: String,
    from: String,
    to: String,
    value: String,
    block_number: String,
    time_stamp: String,
    #[serde(default = "default_token_decimal")]
    token_decimal: String,
}

fn default_token_decimal() -> String {
    "18".to_string()
}

impl RawTransfer {
    fn normalize(self) -> Result<TransferRecord, String> {
        let block_number = self
            .block_number
            .parse::<u64>()
            .map_err(|e| format!("blockNumber {:?}: {}", self.block_number, e))?;
        let timestamp = self
            .time_stamp
            .parse::<u64>()
            .map_err(|e| format!("timeStamp {:?}: {}", self.time_stamp, e))?;
        let token_decimal = self
            .token_decimal
            .parse::<u32>()
            .map_err(|e| format!("tokenDecimal {:?}: {}", self.token_decimal, e))?;

        TransferRecord::from_raw(
            &self.hash,
            &self.from,
            &self.to,
            &self.value,
            block_number,
            timestamp,
            token_decimal,
        )
    }
}

/// Explorer client implementing [`LedgerExplorer`]
#[derive(Debug, Clone)]
pub struct EtherscanClient {
    http_client: Client,
    config: ExplorerConfig,
}

impl EtherscanClient {
    pub fn new(config: ExplorerConfig) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Explorer(ExplorerError::Network(e.to_string())))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ExplorerConfig {
        &self.config
    }

    fn base_params(&self, api_key: &SecretString) -> Vec<(&'static str, String)> {
        let mut params = vec![("apikey", api_key.expose_secret().to_string())];
        if let Some(chain_id) = self.config.chain_id {
            params.push(("chainid", chain_id.to_string()));
        }
        params
    }

    /// Map a parsed `tokentx` envelope to an outcome
    fn classify(&self, response: ApiResponse) -> FetchOutcome {
        let status = response.status.as_deref().unwrap_or_default();
        let message = response.message.unwrap_or_default();

        if status == "1" {
            return self.normalize_rows(response.result);
        }

        if message.contains("No transactions found") {
            return FetchOutcome::Empty;
        }

        let detail = match &response.result {
            Value::String(s) => format!("{} {}", message, s),
            _ => message.clone(),
        };
        let lowered = detail.to_lowercase();

        if lowered.contains("rate limit") || lowered.contains("max rate") {
            return FetchOutcome::RateLimited;
        }
        if lowered.contains("result window is too large") {
            return FetchOutcome::Ok {
                records: Vec::new(),
                at_cap: true,
            };
        }
        if lowered.contains("invalid api key")
            || lowered.contains("missing or invalid")
            || lowered.contains("invalid address")
            || lowered.contains("invalid contract")
        {
            return FetchOutcome::FatalError(detail.trim().to_string());
        }

        // Unknown status but the payload may still hold rows.
        if status.is_empty() && response.result.is_array() {
            return self.normalize_rows(response.result);
        }

        FetchOutcome::TransientError(format!("API error: {}", detail.trim()))
    }

    fn normalize_rows(&self, result: Value) -> FetchOutcome {
        let rows: Vec<RawTransfer> = match serde_json::from_value(result) {
            Ok(rows) => rows,
            Err(e) => {
                return FetchOutcome::TransientError(format!("malformed result rows: {}", e));
            }
        };

        if rows.is_empty() {
            return FetchOutcome::Empty;
        }

        let count = rows.len();
        let records: Result<Vec<_>, _> = rows.into_iter().map(RawTransfer::normalize).collect();
        match records {
            Ok(records) => FetchOutcome::Ok {
                records,
                at_cap: count >= self.config.cap_threshold(),
            },
            Err(e) => FetchOutcome::TransientError(format!("malformed transfer: {}", e)),
        }
    }
}

#[async_trait]
impl LedgerExplorer for EtherscanClient {
    #[instrument(skip(self, api_key), fields(range = %range))]
    async fn fetch_transfers(&self, range: BlockRange, api_key: &SecretString) -> FetchOutcome {
        let mut params = self.base_params(api_key);
        params.extend([
            ("module", "account".to_string()),
            ("action", "tokentx".to_string()),
            ("contractaddress", self.config.contract_address.to_lowercase()),
            ("startblock", range.start().to_string()),
            ("endblock", range.end().to_string()),
            ("page", "1".to_string()),
            ("offset", self.config.max_results.to_string()),
            ("sort", "asc".to_string()),
        ]);

        let response = match self
            .http_client
            .get(&self.config.base_url)
            .query(&params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Explorer request failed");
                return FetchOutcome::TransientError(format!("request error: {}", e));
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return FetchOutcome::RateLimited;
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Explorer rejected credentials");
            return FetchOutcome::FatalError(format!("HTTP {}: {}", status.as_u16(), body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Explorer returned error status");
            return FetchOutcome::TransientError(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            ));
        }

        let parsed: ApiResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Failed to parse explorer response");
                return FetchOutcome::TransientError(format!("malformed response: {}", e));
            }
        };

        let outcome = self.classify(parsed);
        if let FetchOutcome::Ok { records, at_cap } = &outcome {
            debug!(count = records.len(), at_cap = %at_cap, "Explorer window fetched");
        }
        outcome
    }

    #[instrument(skip(self, api_key))]
    async fn chain_head(&self, api_key: &SecretString) -> Result<u64, AppError> {
        let mut params = self.base_params(api_key);
        params.extend([
            ("module", "proxy".to_string()),
            ("action", "eth_blockNumber".to_string()),
        ]);

        let response = self
            .http_client
            .get(&self.config.base_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| AppError::Explorer(ExplorerError::Network(e.to_string())))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::Explorer(ExplorerError::RateLimited(
                "eth_blockNumber".to_string(),
            )));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Explorer rejected credentials");
            return Err(AppError::Explorer(ExplorerError::Fatal(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            ))));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Explorer(ExplorerError::ApiError {
                status_code: status.as_u16(),
                message: body,
            }));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| AppError::Explorer(ExplorerError::ParseError(e.to_string())))?;

        let hex = parsed.result.as_str().ok_or_else(|| {
            AppError::Explorer(ExplorerError::ParseError(format!(
                "eth_blockNumber result is not a string: {}",
                parsed.result
            )))
        })?;

        parse_hex_block(hex)
            .ok_or_else(|| {
                let lowered = hex.to_lowercase();
                if lowered.contains("rate limit") {
                    AppError::Explorer(ExplorerError::RateLimited(hex.to_string()))
                } else if lowered.contains("invalid api key") {
                    AppError::Explorer(ExplorerError::Fatal(hex.to_string()))
                } else {
                    AppError::Explorer(ExplorerError::ParseError(format!(
                        "invalid block number {:?}",
                        hex
                    )))
                }
            })
            .inspect(|head| debug!(chain_head = %head, "Chain head fetched"))
    }
}

fn parse_hex_block(hex: &str) -> Option<u64> {
    let digits = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X"))?;
    u64::from_str_radix(digits, 16).ok()
}
