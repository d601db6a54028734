//! JobRunRepository (spec §4.4) — idempotent job-run bookkeeping.

use chrono::NaiveDate;
use sqlx::PgExecutor;

use crate::error::WorkerError;
use crate::models::{JobRun, JobRunStatus, JobRunType};

use super::map_db_error;

/// Transitions a run to `RUNNING`, creating the row if this is the first
/// attempt for `trading_date_et` (spec §4.9, idempotent start).
pub async fn start<'c, E>(
    exec: E,
    kind: JobRunType,
    trading_date_et: NaiveDate,
) -> Result<JobRun, WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, JobRun>(
        r#"
        insert into job_run (type, trading_date_et, status, started_at)
        values ($1, $2, 'RUNNING', now())
        on conflict (type, trading_date_et) do update set
            status = 'RUNNING',
            started_at = now(),
            finished_at = null,
            updated_at = now()
        returning *
        "#,
    )
    .bind(kind)
    .bind(trading_date_et)
    .fetch_one(exec)
    .await
    .map_err(map_db_error)
}

pub async fn complete<'c, E>(
    exec: E,
    id: uuid::Uuid,
    summary_json: serde_json::Value,
) -> Result<JobRun, WorkerError>
where
    E: PgExecutor<'c>,
{
    mark_status(exec, id, JobRunStatus::Success, Some(summary_json)).await
}

pub async fn fail<'c, E>(
    exec: E,
    id: uuid::Uuid,
    summary_json: serde_json::Value,
) -> Result<JobRun, WorkerError>
where
    E: PgExecutor<'c>,
{
    mark_status(exec, id, JobRunStatus::Failed, Some(summary_json)).await
}

pub async fn mark_status<'c, E>(
    exec: E,
    id: uuid::Uuid,
    status: JobRunStatus,
    summary_json: Option<serde_json::Value>,
) -> Result<JobRun, WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, JobRun>(
        r#"
        update job_run set
            status = $2,
            finished_at = case when $2 in ('SUCCESS','FAILED') then now() else finished_at end,
            summary_json = coalesce($3, summary_json),
            updated_at = now()
        where id = $1
        returning *
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(summary_json)
    .fetch_one(exec)
    .await
    .map_err(map_db_error)
}

pub async fn list_recent<'c, E>(exec: E, limit: Option<i64>) -> Result<Vec<JobRun>, WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, JobRun>("select * from job_run order by trading_date_et desc limit $1")
        .bind(limit.unwrap_or(10))
        .fetch_all(exec)
        .await
        .map_err(map_db_error)
}

pub async fn get_by_trading_date<'c, E>(
    exec: E,
    kind: JobRunType,
    trading_date_et: NaiveDate,
) -> Result<Option<JobRun>, WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, JobRun>("select * from job_run where type = $1 and trading_date_et = $2")
        .bind(kind)
        .bind(trading_date_et)
        .fetch_optional(exec)
        .await
        .map_err(map_db_error)
}
