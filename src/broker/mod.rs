//! Brokerage API client (spec §4.3, §6).

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::WorkerError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RETRIES: u32 = 2;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const BACKOFF_FACTOR: u32 = 2;

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 425 | 429 | 500 | 502 | 503 | 504)
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOrderRequest {
    pub symbol: String,
    pub side: &'static str,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub time_in_force: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notional: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<String>,
    pub client_order_id: String,
    pub extended_hours: bool,
}

impl SubmitOrderRequest {
    pub fn notional(symbol: &str, notional: &str, client_order_id: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: "buy",
            order_type: "market",
            time_in_force: "day",
            notional: Some(notional.to_string()),
            qty: None,
            client_order_id: client_order_id.to_string(),
            extended_hours: false,
        }
    }

    pub fn quantity(symbol: &str, qty: &str, client_order_id: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: "buy",
            order_type: "market",
            time_in_force: "day",
            notional: None,
            qty: Some(qty.to_string()),
            client_order_id: client_order_id.to_string(),
            extended_hours: false,
        }
    }
}

/// Broker order response; monetary/quantity fields are strings on the wire
/// (spec §6) and are parsed into `Decimal` at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub id: String,
    pub client_order_id: String,
    pub status: String,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub filled_qty: Option<String>,
    #[serde(default)]
    pub filled_avg_price: Option<String>,
    #[serde(default)]
    pub notional: Option<String>,
    #[serde(default)]
    pub qty: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BrokerOrder {
    pub fn filled_qty_decimal(&self) -> Option<Decimal> {
        self.filled_qty.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn filled_avg_price_decimal(&self) -> Option<Decimal> {
        self.filled_avg_price
            .as_deref()
            .and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockResponse {
    pub timestamp: DateTime<Utc>,
    pub is_open: bool,
    pub next_open: DateTime<Utc>,
    pub next_close: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub date: NaiveDate,
    #[serde(default)]
    pub open: Option<String>,
    #[serde(default)]
    pub close: Option<String>,
    #[serde(default)]
    pub session_open: Option<String>,
    #[serde(default)]
    pub session_close: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestTradeResponse {
    pub symbol: String,
    pub trade: LatestTrade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestTrade {
    #[serde(rename = "p")]
    pub price: f64,
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn submit_order(&self, req: SubmitOrderRequest) -> Result<BrokerOrder, WorkerError>;
    async fn get_order(&self, broker_order_id: &str) -> Result<BrokerOrder, WorkerError>;
    async fn get_order_by_client_id(&self, client_order_id: &str) -> Result<BrokerOrder, WorkerError>;
    async fn get_latest_trade(&self, symbol: &str) -> Result<Decimal, WorkerError>;
    async fn get_clock(&self) -> Result<ClockResponse, WorkerError>;
    async fn get_calendar(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<CalendarEntry>, WorkerError>;
}

#[derive(Clone)]
pub struct AlpacaClient {
    client: reqwest::Client,
    trading_base_url: String,
    data_base_url: String,
}

impl AlpacaClient {
    pub fn new(
        trading_base_url: String,
        data_base_url: String,
        key_id: &str,
        secret_key: &str,
    ) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "APCA-API-KEY-ID",
            key_id.parse().context("invalid ALPACA_KEY_ID")?,
        );
        headers.insert(
            "APCA-API-SECRET-KEY",
            secret_key.parse().context("invalid ALPACA_SECRET_KEY")?,
        );
        headers.insert(reqwest::header::ACCEPT, "application/json".parse().unwrap());
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .default_headers(headers)
            .build()
            .context("failed to build AlpacaClient")?;
        Ok(Self {
            client,
            trading_base_url,
            data_base_url,
        })
    }

    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, WorkerError> {
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 0..=MAX_RETRIES {
            let result = build().send().await;
            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() || !is_retryable_status(status) {
                        return Ok(resp);
                    }
                    if attempt < MAX_RETRIES {
                        warn!(status = status.as_u16(), attempt, "retryable broker error, backing off {:?}", backoff);
                        tokio::time::sleep(backoff).await;
                        backoff *= BACKOFF_FACTOR;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        warn!(attempt, error = %e, "network error calling broker, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff *= BACKOFF_FACTOR;
                        continue;
                    }
                    return Err(WorkerError::Unexpected(anyhow::anyhow!(e)));
                }
            }
        }
        unreachable!("retry loop always returns or errors")
    }

    async fn error_from_response(url: String, resp: reqwest::Response) -> WorkerError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let violations = parse_violations(&body);
            let message = violations
                .first()
                .cloned()
                .unwrap_or_else(|| body.chars().take(1024).collect());
            return WorkerError::BrokerValidation { message, violations };
        }

        if matches!(status, StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN)
            && body.to_lowercase().contains("buying power")
        {
            return WorkerError::BrokerInsufficientFunds { message: body.chars().take(1024).collect() };
        }

        WorkerError::Transport {
            url,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("unknown").to_string(),
            body: body.chars().take(1024).collect(),
        }
    }
}

fn parse_violations(body: &str) -> Vec<String> {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    value
        .get("data")
        .and_then(|d| d.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| item.get("message").and_then(|m| m.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Broker for AlpacaClient {
    async fn submit_order(&self, req: SubmitOrderRequest) -> Result<BrokerOrder, WorkerError> {
        let url = format!("{}/v2/orders", self.trading_base_url);
        let resp = self
            .send_with_retry(|| self.client.post(&url).json(&req))
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(url, resp).await);
        }
        resp.json::<BrokerOrder>()
            .await
            .map_err(|e| WorkerError::Unexpected(anyhow::anyhow!(e).context("parse submit_order response")))
    }

    async fn get_order(&self, broker_order_id: &str) -> Result<BrokerOrder, WorkerError> {
        let url = format!("{}/v2/orders/{}", self.trading_base_url, broker_order_id);
        let resp = self.send_with_retry(|| self.client.get(&url)).await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(url, resp).await);
        }
        resp.json::<BrokerOrder>()
            .await
            .map_err(|e| WorkerError::Unexpected(anyhow::anyhow!(e).context("parse get_order response")))
    }

    async fn get_order_by_client_id(&self, client_order_id: &str) -> Result<BrokerOrder, WorkerError> {
        let url = format!("{}/v2/orders:by_client_order_id", self.trading_base_url);
        let cid = client_order_id.to_string();
        let resp = self
            .send_with_retry(|| self.client.get(&url).query(&[("client_order_id", cid.as_str())]))
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(url, resp).await);
        }
        resp.json::<BrokerOrder>()
            .await
            .map_err(|e| WorkerError::Unexpected(anyhow::anyhow!(e).context("parse get_order_by_client_id response")))
    }

    async fn get_latest_trade(&self, symbol: &str) -> Result<Decimal, WorkerError> {
        let url = format!("{}/v2/stocks/{}/trades/latest", self.data_base_url, symbol);
        let resp = self.send_with_retry(|| self.client.get(&url)).await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(url, resp).await);
        }
        let parsed = resp
            .json::<LatestTradeResponse>()
            .await
            .map_err(|e| WorkerError::Unexpected(anyhow::anyhow!(e).context("parse latest trade response")))?;
        Decimal::try_from(parsed.trade.price)
            .map_err(|e| WorkerError::Unexpected(anyhow::anyhow!(e).context("latest trade price not representable")))
    }

    async fn get_clock(&self) -> Result<ClockResponse, WorkerError> {
        let url = format!("{}/v2/clock", self.trading_base_url);
        let resp = self.send_with_retry(|| self.client.get(&url)).await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(url, resp).await);
        }
        resp.json::<ClockResponse>()
            .await
            .map_err(|e| WorkerError::Unexpected(anyhow::anyhow!(e).context("parse clock response")))
    }

    async fn get_calendar(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<CalendarEntry>, WorkerError> {
        let url = format!("{}/v2/calendar", self.trading_base_url);
        let mut qp: Vec<(&str, String)> = Vec::new();
        if let Some(s) = start {
            qp.push(("start", s.format("%Y-%m-%d").to_string()));
        }
        if let Some(e) = end {
            qp.push(("end", e.format("%Y-%m-%d").to_string()));
        }
        let resp = self
            .send_with_retry(|| self.client.get(&url).query(&qp))
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(url, resp).await);
        }
        resp.json::<Vec<CalendarEntry>>()
            .await
            .map_err(|e| WorkerError::Unexpected(anyhow::anyhow!(e).context("parse calendar response")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_violations_extracts_data_messages() {
        let body = r#"{"code":40010001,"message":"invalid qty","data":[{"message":"fractional qty not supported"}]}"#;
        let violations = parse_violations(body);
        assert_eq!(violations, vec!["fractional qty not supported".to_string()]);
    }

    #[test]
    fn parse_violations_returns_empty_on_malformed_body() {
        assert!(parse_violations("not json").is_empty());
    }
}
