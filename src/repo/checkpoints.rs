//! CheckpointRepository (spec §4.4) — per-trading-date ingest high-water-mark.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgExecutor;

use crate::error::WorkerError;
use crate::models::IngestCheckpoint;

use super::map_db_error;

pub async fn get<'c, E>(
    exec: E,
    trading_date_et: NaiveDate,
) -> Result<Option<IngestCheckpoint>, WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, IngestCheckpoint>(
        "select * from ingest_checkpoint where trading_date_et = $1",
    )
    .bind(trading_date_et)
    .fetch_optional(exec)
    .await
    .map_err(map_db_error)
}

/// Upserts the checkpoint row for `trading_date_et`, called once per window
/// per job run regardless of whether that window observed a new high-water
/// timestamp (spec §3, "upserted once per window per job run"). `None` is a
/// legitimate value — a window that fetched nothing new still gets a row (or
/// keeps its existing one) rather than being skipped. Postgres's `greatest`
/// ignores `NULL` arguments unless all of them are `NULL`, so passing `None`
/// here can only leave an existing timestamp untouched, never regress it.
pub async fn upsert<'c, E>(
    exec: E,
    trading_date_et: NaiveDate,
    last_filed_ts_processed_et: Option<DateTime<Utc>>,
) -> Result<IngestCheckpoint, WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, IngestCheckpoint>(
        r#"
        insert into ingest_checkpoint (trading_date_et, last_filed_ts_processed_et)
        values ($1, $2)
        on conflict (trading_date_et) do update set
            last_filed_ts_processed_et = greatest(
                excluded.last_filed_ts_processed_et,
                ingest_checkpoint.last_filed_ts_processed_et
            ),
            updated_at = now()
        returning *
        "#,
    )
    .bind(trading_date_et)
    .bind(last_filed_ts_processed_et)
    .fetch_one(exec)
    .await
    .map_err(map_db_error)
}

pub async fn delete<'c, E>(exec: E, trading_date_et: NaiveDate) -> Result<(), WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query("delete from ingest_checkpoint where trading_date_et = $1")
        .bind(trading_date_et)
        .execute(exec)
        .await
        .map_err(map_db_error)?;
    Ok(())
}

pub async fn list<'c, E>(
    exec: E,
    limit: Option<i64>,
) -> Result<Vec<IngestCheckpoint>, WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, IngestCheckpoint>(
        "select * from ingest_checkpoint order by trading_date_et desc limit $1",
    )
    .bind(limit.unwrap_or(30))
    .fetch_all(exec)
    .await
    .map_err(map_db_error)
}
