//! Persisted entities and their identity derivations.
//!
//! See spec §3. Monetary and quantity fields use `rust_decimal::Decimal` end to
//! end - never `f64` - so that Postgres round-trips and comparisons stay exact.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;

/// Maximum length of a broker-facing client order id (spec §3).
pub const CLIENT_ORDER_ID_MAX_LEN: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Buy,
    Sell,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum Party {
    Democrat,
    Republican,
    Independent,
    Other,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum TradeStatus {
    New,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Failed,
}

impl TradeStatus {
    /// Terminal set per spec §3/§4.3: once reached, no further updates mutate status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TradeStatus::Filled
                | TradeStatus::Canceled
                | TradeStatus::Rejected
                | TradeStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum JobRunStatus {
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum JobRunType {
    OpenJob,
}

/// A single upstream congressional-trade disclosure, normalized.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FilingRecord {
    pub id: uuid::Uuid,
    pub ticker: String,
    pub member_name: String,
    pub transaction: TransactionKind,
    pub trade_date: chrono::NaiveDate,
    pub filing_date: chrono::NaiveDate,
    pub party: Option<Party>,
    pub raw: serde_json::Value,
    pub ingested_at: DateTime<Utc>,
}

/// Fields needed to construct a new `FilingRecord` prior to insertion.
#[derive(Debug, Clone)]
pub struct NewFilingRecord {
    pub ticker: String,
    pub member_name: String,
    pub transaction: TransactionKind,
    pub trade_date: chrono::NaiveDate,
    pub filing_date: chrono::NaiveDate,
    pub party: Option<Party>,
    pub raw: serde_json::Value,
}

impl NewFilingRecord {
    /// Stable digest over `(upper(ticker), member_name, filing_date, trade_date,
    /// transaction)` (spec §3, "Identity derivations"). Distinct raw records mapping
    /// to the same hash collapse to one trade.
    pub fn source_hash(&self) -> String {
        source_hash(
            &self.ticker,
            &self.member_name,
            self.filing_date,
            self.trade_date,
            self.transaction,
        )
    }
}

pub fn source_hash(
    ticker: &str,
    member_name: &str,
    filing_date: chrono::NaiveDate,
    trade_date: chrono::NaiveDate,
    transaction: TransactionKind,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ticker.to_uppercase().as_bytes());
    hasher.update(b"|");
    hasher.update(member_name.as_bytes());
    hasher.update(b"|");
    hasher.update(filing_date.format("%Y-%m-%d").to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(trade_date.format("%Y-%m-%d").to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(format!("{:?}", transaction).as_bytes());
    hex::encode(hasher.finalize())
}

/// First `CLIENT_ORDER_ID_MAX_LEN` characters of `source_hash` (broker-side
/// idempotency key, spec §3).
pub fn client_order_id_from(preferred_or_hash: &str) -> String {
    preferred_or_hash
        .chars()
        .take(CLIENT_ORDER_ID_MAX_LEN)
        .collect()
}

/// A single paper-brokerage order attempt, keyed by `source_hash`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TradeAttempt {
    pub id: uuid::Uuid,
    pub source_hash: String,
    pub client_order_id: String,
    pub broker_order_id: Option<String>,
    pub symbol: String,
    pub notional_submitted: Option<Decimal>,
    pub qty_submitted: Option<Decimal>,
    pub filled_qty: Option<Decimal>,
    pub filled_avg_price: Option<Decimal>,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub raw_order_json: Option<serde_json::Value>,
    pub congress_trade_feed_id: Option<uuid::Uuid>,
    pub failure_reason: Option<String>,
}

/// Parameters to create a new `TradeAttempt` row (side/type/tif are constants
/// per spec §3 and are not parameterized).
#[derive(Debug, Clone)]
pub struct NewTradeAttempt {
    pub source_hash: String,
    pub client_order_id: String,
    pub symbol: String,
    pub notional_submitted: Option<Decimal>,
    pub qty_submitted: Option<Decimal>,
    pub status: TradeStatus,
    pub congress_trade_feed_id: Option<uuid::Uuid>,
    pub failure_reason: Option<String>,
}

/// Partial update applied by the poller / submitter as a trade progresses.
#[derive(Debug, Clone, Default)]
pub struct TradeAttemptPatch {
    pub broker_order_id: Option<String>,
    pub status: Option<TradeStatus>,
    pub filled_qty: Option<Decimal>,
    pub filled_avg_price: Option<Decimal>,
    pub notional_submitted: Option<Option<Decimal>>,
    pub qty_submitted: Option<Option<Decimal>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub raw_order_json: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
}

/// At most one row per `(type, trading_date_et)` (spec §3).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobRun {
    pub id: uuid::Uuid,
    #[sqlx(rename = "type")]
    pub kind: JobRunType,
    pub trading_date_et: chrono::NaiveDate,
    pub status: JobRunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub summary_json: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-trading-date high-water-mark of processed filing timestamps (spec §3).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IngestCheckpoint {
    pub trading_date_et: chrono::NaiveDate,
    pub last_filed_ts_processed_et: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_hash_is_stable_and_case_insensitive_on_ticker() {
        let d1 = chrono::NaiveDate::from_ymd_opt(2024, 2, 15).unwrap();
        let d2 = chrono::NaiveDate::from_ymd_opt(2024, 2, 14).unwrap();
        let a = source_hash("brk.b", "Nancy Pelosi", d1, d2, TransactionKind::Buy);
        let b = source_hash("BRK.B", "Nancy Pelosi", d1, d2, TransactionKind::Buy);
        assert_eq!(a, b);
    }

    #[test]
    fn source_hash_differs_on_transaction_kind() {
        let d1 = chrono::NaiveDate::from_ymd_opt(2024, 2, 15).unwrap();
        let d2 = chrono::NaiveDate::from_ymd_opt(2024, 2, 14).unwrap();
        let buy = source_hash("AAPL", "Dan Crenshaw", d1, d2, TransactionKind::Buy);
        let sell = source_hash("AAPL", "Dan Crenshaw", d1, d2, TransactionKind::Sell);
        assert_ne!(buy, sell);
    }

    #[test]
    fn client_order_id_is_capped_at_48_chars() {
        let long_hash = "a".repeat(64);
        let cid = client_order_id_from(&long_hash);
        assert_eq!(cid.len(), CLIENT_ORDER_ID_MAX_LEN);
    }
}
