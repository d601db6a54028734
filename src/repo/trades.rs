//! TradeRepository (spec §4.4).

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::error::WorkerError;
use crate::models::{NewTradeAttempt, TradeAttempt, TradeAttemptPatch};

use super::map_db_error;

pub async fn create_attempt<'c, E>(
    exec: E,
    new: &NewTradeAttempt,
) -> Result<TradeAttempt, WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, TradeAttempt>(
        r#"
        insert into trade (
            source_hash, client_order_id, symbol,
            notional_submitted, qty_submitted, status,
            congress_trade_feed_id, failure_reason
        ) values ($1, $2, $3, $4, $5, $6, $7, $8)
        returning *
        "#,
    )
    .bind(&new.source_hash)
    .bind(&new.client_order_id)
    .bind(&new.symbol)
    .bind(new.notional_submitted)
    .bind(new.qty_submitted)
    .bind(new.status)
    .bind(new.congress_trade_feed_id)
    .bind(&new.failure_reason)
    .fetch_one(exec)
    .await
    .map_err(map_db_error)
}

/// Idempotent upsert keyed by `source_hash` (spec §4.4). If a row already
/// exists, `update` is applied instead of `create` - used by callers that want
/// "insert or load existing" semantics around the unique-constraint race.
pub async fn upsert_by_source_hash<'c, E>(
    exec: E,
    create: &NewTradeAttempt,
) -> Result<TradeAttempt, WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, TradeAttempt>(
        r#"
        insert into trade (
            source_hash, client_order_id, symbol,
            notional_submitted, qty_submitted, status,
            congress_trade_feed_id, failure_reason
        ) values ($1, $2, $3, $4, $5, $6, $7, $8)
        on conflict (source_hash) do update set updated_at = trade.updated_at
        returning *
        "#,
    )
    .bind(&create.source_hash)
    .bind(&create.client_order_id)
    .bind(&create.symbol)
    .bind(create.notional_submitted)
    .bind(create.qty_submitted)
    .bind(create.status)
    .bind(create.congress_trade_feed_id)
    .bind(&create.failure_reason)
    .fetch_one(exec)
    .await
    .map_err(map_db_error)
}

/// Applies a partial update. Refuses to mutate `status` once the row has
/// reached a terminal status (spec §8, "Terminal closure").
pub async fn update<'c, E>(
    exec: E,
    id: uuid::Uuid,
    patch: &TradeAttemptPatch,
) -> Result<TradeAttempt, WorkerError>
where
    E: PgExecutor<'c>,
{
    let notional = patch.notional_submitted.clone();
    let qty = patch.qty_submitted.clone();
    sqlx::query_as::<_, TradeAttempt>(
        r#"
        update trade set
            broker_order_id = coalesce($2, broker_order_id),
            status = case when status in ('FILLED','CANCELED','REJECTED','FAILED')
                          then status else coalesce($3, status) end,
            filled_qty = coalesce($4, filled_qty),
            filled_avg_price = coalesce($5, filled_avg_price),
            notional_submitted = case when $6 then $7 else notional_submitted end,
            qty_submitted = case when $8 then $9 else qty_submitted end,
            submitted_at = coalesce($10, submitted_at),
            filled_at = coalesce($11, filled_at),
            canceled_at = coalesce($12, canceled_at),
            failed_at = coalesce($13, failed_at),
            raw_order_json = coalesce($14, raw_order_json),
            failure_reason = coalesce($15, failure_reason),
            updated_at = now()
        where id = $1
        returning *
        "#,
    )
    .bind(id)
    .bind(&patch.broker_order_id)
    .bind(patch.status)
    .bind(patch.filled_qty)
    .bind(patch.filled_avg_price)
    .bind(notional.is_some())
    .bind(notional.flatten())
    .bind(qty.is_some())
    .bind(qty.flatten())
    .bind(patch.submitted_at)
    .bind(patch.filled_at)
    .bind(patch.canceled_at)
    .bind(patch.failed_at)
    .bind(&patch.raw_order_json)
    .bind(&patch.failure_reason)
    .fetch_one(exec)
    .await
    .map_err(map_db_error)
}

pub async fn find_by_source_hash<'c, E>(
    exec: E,
    source_hash: &str,
) -> Result<Option<TradeAttempt>, WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, TradeAttempt>("select * from trade where source_hash = $1")
        .bind(source_hash)
        .fetch_optional(exec)
        .await
        .map_err(map_db_error)
}

pub async fn find_by_broker_order_id<'c, E>(
    exec: E,
    broker_order_id: &str,
) -> Result<Option<TradeAttempt>, WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, TradeAttempt>("select * from trade where broker_order_id = $1")
        .bind(broker_order_id)
        .fetch_optional(exec)
        .await
        .map_err(map_db_error)
}

pub async fn list_open<'c, E>(
    exec: E,
    limit: Option<i64>,
) -> Result<Vec<TradeAttempt>, WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, TradeAttempt>(
        r#"
        select * from trade
        where status in ('NEW','ACCEPTED','PARTIALLY_FILLED')
        order by created_at asc
        limit $1
        "#,
    )
    .bind(limit.unwrap_or(1000))
    .fetch_all(exec)
    .await
    .map_err(map_db_error)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    Asc,
    Desc,
}

pub struct ListParams<'a> {
    pub page: i64,
    pub page_size: i64,
    pub symbol: Option<&'a str>,
    pub start_date: Option<chrono::NaiveDate>,
    pub end_date: Option<chrono::NaiveDate>,
    pub order: ListOrder,
}

pub async fn list<'c, E>(exec: E, params: ListParams<'_>) -> Result<Vec<TradeAttempt>, WorkerError>
where
    E: PgExecutor<'c>,
{
    let page_size = params.page_size.clamp(1, 100);
    let offset = params.page.max(0) * page_size;
    let order_sql = match params.order {
        ListOrder::Asc => "asc",
        ListOrder::Desc => "desc",
    };
    let query = format!(
        r#"
        select * from trade
        where ($1::text is null or symbol = $1)
          and ($2::date is null or created_at::date >= $2)
          and ($3::date is null or created_at::date <= $3)
        order by created_at {order_sql}
        limit $4 offset $5
        "#
    );
    sqlx::query_as::<_, TradeAttempt>(&query)
        .bind(params.symbol)
        .bind(params.start_date)
        .bind(params.end_date)
        .bind(page_size)
        .bind(offset)
        .fetch_all(exec)
        .await
        .map_err(map_db_error)
}

/// Count of attempts whose `created_at` falls in `[window_start, window_end]`,
/// optionally scoped to one symbol - backs the guardrail evaluator's counters.
pub async fn count_in_window<'c, E>(
    exec: E,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    symbol: Option<&str>,
) -> Result<i64, WorkerError>
where
    E: PgExecutor<'c>,
{
    let (count,): (i64,) = sqlx::query_as(
        r#"
        select count(*) from trade
        where created_at between $1 and $2
          and ($3::text is null or symbol = $3)
          and status != 'FAILED'
        "#,
    )
    .bind(window_start)
    .bind(window_end)
    .bind(symbol)
    .fetch_one(exec)
    .await
    .map_err(map_db_error)?;
    Ok(count)
}
