//! Transaction-aware persistence (spec §4.4).
//!
//! Every repository function is generic over `sqlx::PgExecutor<'_>` so callers
//! can pass either a pool or an open transaction - "accept an optional
//! transaction handle" (spec §4.4) without a separate code path for each.

pub mod checkpoints;
pub mod feed;
pub mod job_runs;
pub mod trades;

use crate::error::WorkerError;

/// Maps a Postgres unique-violation into the typed `DbUniqueConstraint` error
/// spec §7 calls for; everything else passes through unchanged.
pub fn map_db_error(err: sqlx::Error) -> WorkerError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            let columns = db_err
                .constraint()
                .map(|c| vec![c.to_string()])
                .unwrap_or_default();
            return WorkerError::DbUniqueConstraint { columns };
        }
    }
    WorkerError::Unexpected(anyhow::anyhow!(err))
}

/// Connects to Postgres and runs embedded migrations, mirroring the pack's
/// `mqk-db::connect_from_env`/`migrate` shape.
pub async fn connect_and_migrate(database_url: &str) -> anyhow::Result<sqlx::PgPool> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}
