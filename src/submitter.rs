//! Trade Submitter (spec §4.7).
//!
//! Grounded on `vault/trade_executor.rs`'s per-identity execution result
//! struct and `vault/execution.rs`'s notional-to-qty fallback shape, adapted
//! from a single-exchange backtest fill to a live paper-brokerage submission.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::broker::{Broker, SubmitOrderRequest};
use crate::error::WorkerError;
use crate::guardrail::{self, GuardrailConfig, GuardrailContext, GuardrailDecision};
use crate::models::{client_order_id_from, NewTradeAttempt, TradeAttemptPatch, TradeStatus};
use crate::poller::{self, OrderLookup};
use crate::repo::trades as trade_repo;
use crate::status::map_broker_status;

#[derive(Debug, Clone)]
pub struct SubmitForFilingRequest {
    pub symbol: String,
    pub source_hash: String,
    pub client_order_id: Option<String>,
    pub congress_trade_feed_id: Option<uuid::Uuid>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SubmitForFilingOutcome {
    pub trade_id: uuid::Uuid,
    pub broker_order_id: Option<String>,
    pub client_order_id: String,
    pub status: TradeStatus,
    pub fallback_used: bool,
    pub guardrail_blocked: bool,
    pub notional_submitted: Option<Decimal>,
    pub qty_submitted: Option<Decimal>,
}

/// Submits one filing for paper-brokerage execution end to end: guardrail
/// check, initial notional order, fractional-rejection fallback to whole
/// shares, persistence at every step, and poller handoff (spec §4.7).
pub async fn submit_for_filing(
    pool: &PgPool,
    broker: &dyn Broker,
    guardrail_config: &GuardrailConfig,
    req: SubmitForFilingRequest,
) -> Result<SubmitForFilingOutcome, WorkerError> {
    let notional_string = guardrail_config.trade_notional_usd.round_dp(2).to_string();
    let client_order_id = client_order_id_from(
        req.client_order_id.as_deref().unwrap_or(&req.source_hash),
    );

    // Steps 2-4: guardrail check and `NEW` attempt creation happen inside one
    // transaction; everything after is outside it (spec §4.7 step 4).
    let mut tx = pool.begin().await.map_err(|e| WorkerError::Unexpected(e.into()))?;

    let trades_submitted_today = trade_repo::count_in_window(
        &mut *tx,
        req.window_start,
        req.window_end,
        None,
    )
    .await?;
    let trades_submitted_today_for_ticker = trade_repo::count_in_window(
        &mut *tx,
        req.window_start,
        req.window_end,
        Some(&req.symbol),
    )
    .await?;

    let guardrail_ctx = GuardrailContext {
        trading_date_window_start: req.window_start,
        trading_date_window_end: req.window_end,
        ticker: req.symbol.clone(),
        trades_submitted_today: trades_submitted_today as u32,
        trades_submitted_today_for_ticker: trades_submitted_today_for_ticker as u32,
    };

    if let GuardrailDecision::Denied { guard, message } =
        guardrail::evaluate(guardrail_config, &guardrail_ctx)
    {
        tx.rollback().await.map_err(|e| WorkerError::Unexpected(e.into()))?;
        let failed = trade_repo::create_attempt(
            pool,
            &NewTradeAttempt {
                source_hash: req.source_hash.clone(),
                client_order_id: client_order_id.clone(),
                symbol: req.symbol.clone(),
                notional_submitted: None,
                qty_submitted: None,
                status: TradeStatus::Failed,
                congress_trade_feed_id: req.congress_trade_feed_id,
                failure_reason: Some(format!("{}: {}", guard.as_str(), message)),
            },
        )
        .await?;
        warn!(symbol = %req.symbol, guard = guard.as_str(), "guardrail blocked submission");
        return Ok(SubmitForFilingOutcome {
            trade_id: failed.id,
            broker_order_id: None,
            client_order_id,
            status: TradeStatus::Failed,
            fallback_used: false,
            guardrail_blocked: true,
            notional_submitted: None,
            qty_submitted: None,
        });
    }

    let attempt = trade_repo::create_attempt(
        &mut *tx,
        &NewTradeAttempt {
            source_hash: req.source_hash.clone(),
            client_order_id: client_order_id.clone(),
            symbol: req.symbol.clone(),
            notional_submitted: Some(guardrail_config.trade_notional_usd),
            qty_submitted: None,
            status: TradeStatus::New,
            congress_trade_feed_id: req.congress_trade_feed_id,
            failure_reason: None,
        },
    )
    .await?;

    tx.commit().await.map_err(|e| WorkerError::Unexpected(e.into()))?;

    let trade_id = attempt.id;

    // Step 5: initial notional submission.
    let initial = broker
        .submit_order(SubmitOrderRequest::notional(
            &req.symbol,
            &notional_string,
            &client_order_id,
        ))
        .await;

    let (order, fallback_used, qty_submitted) = match initial {
        Ok(order) => (order, false, None),
        Err(WorkerError::BrokerInsufficientFunds { message }) => {
            mark_failed(pool, trade_id, &message).await?;
            return Err(WorkerError::BrokerInsufficientFunds { message });
        }
        Err(err) if err.is_fallback_trigger() => {
            // Step 6: fallback to a whole-share order at the latest trade price.
            let price = broker.get_latest_trade(&req.symbol).await?;
            if price <= Decimal::ZERO {
                mark_failed(pool, trade_id, "FALLBACK_PRICE_UNAVAILABLE").await?;
                return Err(WorkerError::Unexpected(anyhow::anyhow!(
                    "FALLBACK_PRICE_UNAVAILABLE: no usable latest trade price for {}",
                    req.symbol
                )));
            }
            let qty = (guardrail_config.trade_notional_usd / price).floor();
            if qty <= Decimal::ZERO {
                mark_failed(pool, trade_id, "FALLBACK_QTY_ZERO").await?;
                return Ok(SubmitForFilingOutcome {
                    trade_id,
                    broker_order_id: None,
                    client_order_id,
                    status: TradeStatus::Failed,
                    fallback_used: true,
                    guardrail_blocked: true,
                    notional_submitted: None,
                    qty_submitted: None,
                });
            }

            info!(symbol = %req.symbol, %qty, "notional order rejected, falling back to whole-share quantity");
            let order = broker
                .submit_order(SubmitOrderRequest::quantity(
                    &req.symbol,
                    &qty.to_string(),
                    &client_order_id,
                ))
                .await?;
            (order, true, Some(qty))
        }
        Err(err) => {
            mark_failed(pool, trade_id, &err.to_string()).await?;
            return Err(err);
        }
    };

    // Step 7: persist the submission, preserving which of notional/qty was used.
    let status = map_broker_status(&order.status);
    let patch = TradeAttemptPatch {
        broker_order_id: Some(order.id.clone()),
        status: Some(status),
        notional_submitted: Some(if fallback_used {
            None
        } else {
            Some(guardrail_config.trade_notional_usd)
        }),
        qty_submitted: Some(qty_submitted),
        submitted_at: order.submitted_at.or(Some(Utc::now())),
        raw_order_json: serde_json::to_value(&order).ok(),
        ..Default::default()
    };
    trade_repo::update(pool, trade_id, &patch).await?;

    // Step 8: hand off to the poller.
    let outcome = poller::poll(
        pool,
        broker,
        trade_id,
        OrderLookup::ByBrokerId(&order.id),
        None,
    )
    .await?;

    Ok(SubmitForFilingOutcome {
        trade_id,
        broker_order_id: Some(outcome.order.id.clone()),
        client_order_id,
        status: outcome.status,
        fallback_used,
        guardrail_blocked: false,
        notional_submitted: if fallback_used {
            None
        } else {
            Some(guardrail_config.trade_notional_usd)
        },
        qty_submitted,
    })
}

async fn mark_failed(pool: &PgPool, trade_id: uuid::Uuid, reason: &str) -> Result<(), WorkerError> {
    let patch = TradeAttemptPatch {
        status: Some(TradeStatus::Failed),
        failed_at: Some(Utc::now()),
        failure_reason: Some(reason.to_string()),
        ..Default::default()
    };
    trade_repo::update(pool, trade_id, &patch).await?;
    Ok(())
}
