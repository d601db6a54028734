//! Order Poller (spec §4.6).
//!
//! Bounded-time loop with exponential backoff grounded on the broker/feed
//! clients' `retry_request` shape, but driven by an elapsed-wall-time deadline
//! instead of a fixed attempt count (`tokio::time::sleep` between iterations).

use std::time::Duration;

use sqlx::PgPool;
use tracing::{debug, warn};

use crate::broker::{Broker, BrokerOrder};
use crate::error::WorkerError;
use crate::models::{TradeAttemptPatch, TradeStatus};
use crate::repo::trades as trade_repo;
use crate::status::map_broker_status;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const INITIAL_DELAY: Duration = Duration::from_secs(1);
const BACKOFF_FACTOR: f64 = 1.6;
const MAX_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub order: BrokerOrder,
    pub status: TradeStatus,
    pub attempts: u32,
    pub duration_ms: u128,
    pub timed_out: bool,
}

/// Identifies the broker order to poll; exactly one of the two must be known
/// (spec §4.6: "raise if neither supplied").
#[derive(Debug, Clone)]
pub enum OrderLookup<'a> {
    ByBrokerId(&'a str),
    ByClientId(&'a str),
}

/// Polls `broker` for `trade_id`'s order until terminal or `timeout` elapses,
/// persisting each observed transition via `TradeRepository.update`. Runs
/// against the pool directly - per spec §4.7 step 4, polling always happens
/// outside the submission transaction.
pub async fn poll(
    pool: &PgPool,
    broker: &dyn Broker,
    trade_id: uuid::Uuid,
    lookup: OrderLookup<'_>,
    timeout: Option<Duration>,
) -> Result<PollOutcome, WorkerError> {
    let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
    let start = std::time::Instant::now();
    let mut delay = INITIAL_DELAY;
    let mut attempts: u32 = 0;
    let mut last: Option<BrokerOrder> = None;

    loop {
        let order = match lookup {
            OrderLookup::ByBrokerId(id) => broker.get_order(id).await?,
            OrderLookup::ByClientId(id) => broker.get_order_by_client_id(id).await?,
        };
        attempts += 1;
        let status = map_broker_status(&order.status);

        let patch = TradeAttemptPatch {
            broker_order_id: Some(order.id.clone()),
            status: Some(status),
            filled_qty: order.filled_qty_decimal(),
            filled_avg_price: order.filled_avg_price_decimal(),
            filled_at: if status == TradeStatus::Filled {
                Some(chrono::Utc::now())
            } else {
                None
            },
            canceled_at: if status == TradeStatus::Canceled {
                Some(chrono::Utc::now())
            } else {
                None
            },
            failed_at: if status == TradeStatus::Rejected || status == TradeStatus::Failed {
                Some(chrono::Utc::now())
            } else {
                None
            },
            raw_order_json: serde_json::to_value(&order).ok(),
            ..Default::default()
        };
        trade_repo::update(pool, trade_id, &patch).await?;

        debug!(trade_id = %trade_id, status = %order.status, attempts, "polled order status");
        last = Some(order);

        if status.is_terminal() {
            return Ok(PollOutcome {
                order: last.unwrap(),
                status,
                attempts,
                duration_ms: start.elapsed().as_millis(),
                timed_out: false,
            });
        }

        if start.elapsed() >= timeout {
            warn!(trade_id = %trade_id, attempts, "order poll timed out before reaching a terminal status");
            return Ok(PollOutcome {
                order: last.unwrap(),
                status,
                attempts,
                duration_ms: start.elapsed().as_millis(),
                timed_out: true,
            });
        }

        tokio::time::sleep(delay).await;
        delay = Duration::from_secs_f64((delay.as_secs_f64() * BACKOFF_FACTOR).min(MAX_DELAY.as_secs_f64()));
    }
}
