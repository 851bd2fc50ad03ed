//! Domain types for the ledger synchronization engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::AppError;

/// Index of a credential inside the rate budget's pool
pub type CredentialId = usize;

/// A single token transfer as persisted in the record store.
///
/// Identity is the transaction hash: two records sharing a hash are the same
/// logical event and collapse to one on merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferRecord {
    /// Transaction identifier (unique key)
    pub hash: String,
    /// Sender address, lower-cased
    pub from: String,
    /// Receiver address, lower-cased
    pub to: String,
    /// Raw integer amount as reported by the provider
    pub value: String,
    /// Decimal-adjusted amount (`value / 10^token_decimal`), exact
    pub amount: String,
    pub block_number: u64,
    /// Unix seconds
    pub timestamp: u64,
    pub token_decimal: u32,
}

impl TransferRecord {
    /// Build a record from raw provider fields, normalizing addresses and
    /// computing the fixed-point amount.
    pub fn from_raw(
        hash: &str,
        from: &str,
        to: &str,
        value: &str,
        block_number: u64,
        timestamp: u64,
        token_decimal: u32,
    ) -> Result<Self, String> {
        let amount = format_units(value, token_decimal)?;
        Ok(Self {
            hash: hash.to_string(),
            from: from.to_lowercase(),
            to: to.to_lowercase(),
            value: value.to_string(),
            amount,
            block_number,
            timestamp,
            token_decimal,
        })
    }
}

/// Render a raw integer amount as an exact decimal string with `decimals`
/// fractional digits, trailing zeros trimmed.
pub fn format_units(raw: &str, decimals: u32) -> Result<String, String> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid raw amount {:?}: expected decimal digits", raw));
    }

    // Token values are uint256, so the digits are never parsed into an integer.
    let trimmed = raw.trim_start_matches('0');
    let digits = if trimmed.is_empty() { "0" } else { trimmed }.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return Ok(digits);
    }

    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals - digits.len() + 1), digits)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let frac_part = frac_part.trim_end_matches('0');

    if frac_part.is_empty() {
        Ok(int_part.to_string())
    } else {
        Ok(format!("{}.{}", int_part, frac_part))
    }
}

/// Inclusive `[start, end]` interval of block numbers. Always `start <= end`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, ToSchema)]
pub struct BlockRange {
    start: u64,
    end: u64,
}

/// A block interval not yet represented in the store
pub type Gap = BlockRange;

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Result<Self, AppError> {
        if start > end {
            return Err(AppError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn single(block: u64) -> Self {
        Self {
            start: block,
            end: block,
        }
    }

    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of blocks in the range
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// A range always holds at least one block.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[must_use]
    pub fn contains(&self, block: u64) -> bool {
        block >= self.start && block <= self.end
    }

    #[must_use]
    pub fn intersect(&self, other: &BlockRange) -> Option<BlockRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(BlockRange { start, end })
    }

    /// The window of `size` blocks starting at `cursor`, clipped to this range.
    #[must_use]
    pub fn window(&self, cursor: u64, size: u64) -> Option<BlockRange> {
        if size == 0 || !self.contains(cursor) {
            return None;
        }
        let end = cursor.saturating_add(size - 1).min(self.end);
        Some(BlockRange { start: cursor, end })
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Classified result of one bounded range query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Records returned; `at_cap` means the result count is at or near the
    /// provider's per-query maximum and may be truncated.
    Ok {
        records: Vec<TransferRecord>,
        at_cap: bool,
    },
    Empty,
    RateLimited,
    TransientError(String),
    FatalError(String),
}

/// Phase of the synchronization loop
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Starting,
    FillingGaps,
    ExtendingToHead,
    CaughtUp,
    Error,
    /// Terminal state after an orderly shutdown
    Stopped,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::FillingGaps => "filling_gaps",
            Self::ExtendingToHead => "extending_to_head",
            Self::CaughtUp => "caught_up",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }
}

impl std::str::FromStr for SyncPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "filling_gaps" => Ok(Self::FillingGaps),
            "extending_to_head" => Ok(Self::ExtendingToHead),
            "caught_up" => Ok(Self::CaughtUp),
            "error" => Ok(Self::Error),
            "stopped" => Ok(Self::Stopped),
            _ => Err(format!("Invalid sync phase: {}", s)),
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of the loop for dashboards. Produced, never read back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct SyncStatus {
    pub is_running: bool,
    pub phase: SyncPhase,
    pub last_update: DateTime<Utc>,
    /// First block of the window currently being fetched
    pub current_block: u64,
    /// Last block of the interval currently being worked on
    pub target_block: u64,
    /// Records accepted from the explorer since process start
    pub records_fetched: u64,
    /// Records in the store after the latest merge
    pub total_records: u64,
    pub gaps_remaining: u64,
    pub api_requests: u64,
    /// Most recent errors, oldest first
    pub errors: Vec<String>,
    pub last_activity: String,
    pub uptime_seconds: u64,
    pub requests_per_minute: f64,
    /// Highest block present in the store
    pub checkpoint: Option<u64>,
    pub chain_head: Option<u64>,
    pub blocks_behind: Option<u64>,
    /// Share of `[origin, chain_head]` below the checkpoint, in percent
    pub sync_percentage: Option<f64>,
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Loop is progressing normally
    Healthy,
    /// Loop is cooling down after an error
    Degraded,
    /// Loop has stopped or never reported
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Latest loop phase, if the loop has reported yet
    pub phase: Option<SyncPhase>,
    pub timestamp: DateTime<Utc>,
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn from_phase(phase: Option<SyncPhase>) -> Self {
        let status = match phase {
            Some(SyncPhase::Error) => HealthStatus::Degraded,
            Some(SyncPhase::Stopped) | None => HealthStatus::Unhealthy,
            Some(_) => HealthStatus::Healthy,
        };
        Self {
            status,
            phase,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    #[schema(example = "not_ready")]
    pub r#type: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_sync_phase_display_and_parsing() {
        let phases = vec![
            (SyncPhase::Starting, "starting"),
            (SyncPhase::FillingGaps, "filling_gaps"),
            (SyncPhase::ExtendingToHead, "extending_to_head"),
            (SyncPhase::CaughtUp, "caught_up"),
            (SyncPhase::Error, "error"),
            (SyncPhase::Stopped, "stopped"),
        ];

        for (phase, string) in phases {
            assert_eq!(phase.as_str(), string);
            assert_eq!(phase.to_string(), string);
            assert_eq!(SyncPhase::from_str(string).unwrap(), phase);
        }

        assert!(SyncPhase::from_str("invalid").is_err());
    }

    #[test]
    fn test_block_range_rejects_inverted_bounds() {
        assert!(BlockRange::new(10, 9).is_err());
        let range = BlockRange::new(10, 10).unwrap();
        assert_eq!(range.len(), 1);
    }

    #[test]
    fn test_block_range_window_clips_to_end() {
        let target = BlockRange::new(1000, 1050).unwrap();
        assert_eq!(
            target.window(1000, 100),
            Some(BlockRange::new(1000, 1050).unwrap())
        );
        assert_eq!(
            target.window(1012, 12),
            Some(BlockRange::new(1012, 1023).unwrap())
        );
        assert_eq!(target.window(1051, 10), None);
        assert_eq!(target.window(1000, 0), None);
    }

    #[test]
    fn test_block_range_window_saturates_at_u64_max() {
        let target = BlockRange::new(u64::MAX - 2, u64::MAX).unwrap();
        let window = target.window(u64::MAX - 1, 100).unwrap();
        assert_eq!(window.end(), u64::MAX);
    }

    #[test]
    fn test_block_range_intersect() {
        let a = BlockRange::new(0, 10).unwrap();
        let b = BlockRange::new(5, 20).unwrap();
        assert_eq!(a.intersect(&b), Some(BlockRange::new(5, 10).unwrap()));

        let c = BlockRange::new(11, 12).unwrap();
        assert_eq!(a.intersect(&c), None);
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units("1500000000000000000", 18).unwrap(), "1.5");
        assert_eq!(format_units("1000000000", 9).unwrap(), "1");
        assert_eq!(format_units("42", 9).unwrap(), "0.000000042");
        assert_eq!(format_units("0", 18).unwrap(), "0");
        assert_eq!(format_units("123", 0).unwrap(), "123");
        assert!(format_units("-5", 18).is_err());
        assert!(format_units("abc", 18).is_err());
        assert!(format_units("", 18).is_err());
        assert_eq!(format_units("000250", 2).unwrap(), "2.5");
    }

    #[test]
    fn test_format_units_beyond_u128() {
        // 2^128
        assert_eq!(
            format_units("340282366920938463463374607431768211456", 18).unwrap(),
            "340282366920938463463.374607431768211456"
        );
        // 2^256 - 1
        let max = "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        assert_eq!(format_units(max, 0).unwrap(), max);
        assert_eq!(
            format_units(max, 18).unwrap(),
            "115792089237316195423570985008687907853269984665640564039457.584007913129639935"
        );
    }

    #[test]
    fn test_transfer_record_from_raw_normalizes_addresses() {
        let record = TransferRecord::from_raw(
            "0xabc",
            "0xAbCd",
            "0xEF01",
            "2500000000",
            38_699_339,
            1_700_000_000,
            9,
        )
        .unwrap();

        assert_eq!(record.from, "0xabcd");
        assert_eq!(record.to, "0xef01");
        assert_eq!(record.amount, "2.5");
        assert_eq!(record.value, "2500000000");
    }

    #[test]
    fn test_health_from_phase() {
        assert_eq!(
            HealthResponse::from_phase(Some(SyncPhase::CaughtUp)).status,
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthResponse::from_phase(Some(SyncPhase::Error)).status,
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthResponse::from_phase(None).status,
            HealthStatus::Unhealthy
        );
    }
}
