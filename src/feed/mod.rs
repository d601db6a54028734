//! Upstream congressional-filings feed client (spec §4.2, §6).

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::WorkerError;
use crate::time;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RETRIES: u32 = 2;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const BACKOFF_FACTOR: u32 = 2;

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        408 | 425 | 429 | 500 | 502 | 503 | 504
    )
}

/// A single raw filing row as published by the upstream feed (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFiling {
    #[serde(rename = "Ticker")]
    pub ticker: Option<String>,
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Transaction")]
    pub transaction: Option<String>,
    #[serde(rename = "Filed")]
    pub filed: Option<String>,
    #[serde(rename = "Traded")]
    pub traded: Option<String>,
    #[serde(rename = "Party")]
    pub party: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
pub trait Feed: Send + Sync {
    async fn get_filings_by_date(
        &self,
        civil_day: chrono::NaiveDate,
    ) -> Result<Vec<RawFiling>, WorkerError>;
}

#[derive(Clone)]
pub struct FeedClient {
    client: reqwest::Client,
    base_url: String,
}

impl FeedClient {
    pub fn new(base_url: String, api_key: &str) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Token {api_key}")
                .parse()
                .context("invalid QUIVER_API_KEY")?,
        );
        headers.insert(
            reqwest::header::ACCEPT,
            "application/json".parse().unwrap(),
        );
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .default_headers(headers)
            .build()
            .context("failed to build FeedClient")?;
        Ok(Self { client, base_url })
    }

    async fn fetch_once(&self, date_compact: &str) -> Result<reqwest::Response, WorkerError> {
        let url = format!("{}/bulk/congresstrading?date={}", self.base_url, date_compact);
        self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| WorkerError::Unexpected(anyhow::anyhow!(e).context(url)))
    }
}

#[async_trait]
impl Feed for FeedClient {
    async fn get_filings_by_date(
        &self,
        civil_day: chrono::NaiveDate,
    ) -> Result<Vec<RawFiling>, WorkerError> {
        let date_compact = civil_day.format("%Y%m%d").to_string();
        let url = format!(
            "{}/bulk/congresstrading?date={}",
            self.base_url, date_compact
        );
        let mut backoff = INITIAL_BACKOFF;

        for attempt in 0..=MAX_RETRIES {
            let response = self.fetch_once(&date_compact).await;
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        if body.trim().is_empty() {
                            return Ok(Vec::new());
                        }
                        let value: serde_json::Value = serde_json::from_str(&body)
                            .context("non-JSON body from filings feed")?;
                        match value {
                            serde_json::Value::Array(items) => {
                                let filings: Vec<RawFiling> = items
                                    .into_iter()
                                    .filter_map(|v| serde_json::from_value(v).ok())
                                    .collect();
                                return Ok(filings);
                            }
                            _ => {
                                warn!(date = %date_compact, "filings feed returned non-array JSON; treating as empty");
                                return Ok(Vec::new());
                            }
                        }
                    }

                    if is_retryable_status(status) && attempt < MAX_RETRIES {
                        warn!(
                            date = %date_compact,
                            status = status.as_u16(),
                            attempt,
                            "retryable filings-feed error, backing off {:?}",
                            backoff
                        );
                        tokio::time::sleep(backoff).await;
                        backoff *= BACKOFF_FACTOR;
                        continue;
                    }

                    let body = resp.text().await.unwrap_or_default();
                    let truncated: String = body.chars().take(1024).collect();
                    return Err(WorkerError::Transport {
                        url,
                        status: status.as_u16(),
                        status_text: status
                            .canonical_reason()
                            .unwrap_or("unknown")
                            .to_string(),
                        body: truncated,
                    });
                }
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        warn!(date = %date_compact, attempt, error = %e, "network error fetching filings, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff *= BACKOFF_FACTOR;
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        unreachable!("retry loop always returns or errors")
    }
}

/// Normalized transaction-kind mapping (spec §4.9): case-insensitive substring
/// match, "sold" is explicitly UNKNOWN (not SELL).
pub fn normalize_transaction(raw: &str) -> crate::models::TransactionKind {
    let lower = raw.to_lowercase();
    if lower.contains("sold") {
        return crate::models::TransactionKind::Unknown;
    }
    if lower.contains("purchase") || lower.contains("buy") {
        crate::models::TransactionKind::Buy
    } else if lower.contains("sale") {
        crate::models::TransactionKind::Sell
    } else {
        crate::models::TransactionKind::Unknown
    }
}

/// Normalized party mapping (spec §4.9): trimmed uppercase prefix match.
pub fn normalize_party(raw: Option<&str>) -> Option<crate::models::Party> {
    use crate::models::Party;
    let raw = raw?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(Party::Unknown);
    }
    let upper = trimmed.to_uppercase();
    if upper.starts_with('D') {
        Some(Party::Democrat)
    } else if upper.starts_with("REP") {
        Some(Party::Republican)
    } else if upper.starts_with("IND") {
        Some(Party::Independent)
    } else if upper.starts_with("OTHER") {
        Some(Party::Other)
    } else {
        Some(Party::Unknown)
    }
}

/// Normalizes one raw feed row into a `NewFilingRecord`, returning `None` when
/// a required field is missing or unparseable (spec §4.9, "drop records").
pub fn normalize(raw: &RawFiling) -> Option<crate::models::NewFilingRecord> {
    let ticker = raw.ticker.as_ref()?.trim().to_uppercase();
    if ticker.is_empty() {
        return None;
    }
    let member_name = raw.name.as_ref()?.trim().to_string();
    if member_name.is_empty() {
        return None;
    }
    let filing_date = time::parse_date(raw.filed.as_deref()?)?;
    let filing_date = time::eastern_date(filing_date);
    let trade_date = raw
        .traded
        .as_deref()
        .and_then(time::parse_date)
        .map(time::eastern_date)
        .unwrap_or(filing_date);
    let transaction = normalize_transaction(raw.transaction.as_deref().unwrap_or(""));
    let party = normalize_party(raw.party.as_deref());
    let raw_json = serde_json::to_value(raw).unwrap_or(serde_json::Value::Null);

    Some(crate::models::NewFilingRecord {
        ticker,
        member_name,
        transaction,
        trade_date,
        filing_date,
        party,
        raw: raw_json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_mapping_matches_spec_examples() {
        use crate::models::TransactionKind::*;
        assert!(matches!(normalize_transaction("Purchase"), Buy));
        assert!(matches!(normalize_transaction("buy"), Buy));
        assert!(matches!(normalize_transaction("Sale"), Sell));
        assert!(matches!(normalize_transaction("Sold"), Unknown));
        assert!(matches!(normalize_transaction("Exchange"), Unknown));
    }

    #[test]
    fn party_mapping_matches_spec_examples() {
        use crate::models::Party::*;
        assert!(matches!(normalize_party(Some("D")), Some(Democrat)));
        assert!(matches!(normalize_party(Some("Republican")), Some(Republican)));
        assert!(matches!(normalize_party(Some("independent")), Some(Independent)));
        assert!(matches!(normalize_party(Some("Other")), Some(Other)));
        assert!(matches!(normalize_party(Some("  ")), Some(Unknown)));
        assert!(normalize_party(None).is_none());
    }

    #[test]
    fn normalize_drops_rows_missing_required_fields() {
        let missing_ticker = RawFiling {
            ticker: None,
            name: Some("Someone".into()),
            transaction: Some("Purchase".into()),
            filed: Some("2024-02-15".into()),
            traded: None,
            party: None,
            extra: Default::default(),
        };
        assert!(normalize(&missing_ticker).is_none());
    }

    #[test]
    fn normalize_accepts_well_formed_row() {
        let row = RawFiling {
            ticker: Some(" aapl ".into()),
            name: Some(" Nancy Pelosi ".into()),
            transaction: Some("Purchase".into()),
            filed: Some("2024-02-15".into()),
            traded: Some("2024-02-10".into()),
            party: Some("D".into()),
            extra: Default::default(),
        };
        let normalized = normalize(&row).unwrap();
        assert_eq!(normalized.ticker, "AAPL");
        assert_eq!(normalized.member_name, "Nancy Pelosi");
    }
}
