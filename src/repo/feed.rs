//! FeedRepository (spec §4.4).

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::error::WorkerError;
use crate::models::{FilingRecord, NewFilingRecord};

use super::map_db_error;

pub async fn create<'c, E>(exec: E, new: &NewFilingRecord) -> Result<FilingRecord, WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, FilingRecord>(
        r#"
        insert into congress_trade_feed
            (ticker, member_name, transaction, trade_date, filing_date, party, raw)
        values ($1, $2, $3, $4, $5, $6, $7)
        on conflict (ticker, member_name, filing_date, trade_date) do nothing
        returning *
        "#,
    )
    .bind(&new.ticker)
    .bind(&new.member_name)
    .bind(new.transaction)
    .bind(new.trade_date)
    .bind(new.filing_date)
    .bind(new.party)
    .bind(&new.raw)
    .fetch_one(exec)
    .await
    .map_err(map_db_error)
}

/// Inserts many records, silently skipping duplicates on the
/// `(ticker, member_name, filing_date, trade_date)` key (spec §3, §4.4).
/// Returns the number of rows actually inserted.
pub async fn create_many<'c, E>(
    exec: E,
    records: &[NewFilingRecord],
) -> Result<u64, WorkerError>
where
    E: PgExecutor<'c>,
{
    if records.is_empty() {
        return Ok(0);
    }

    let tickers: Vec<&str> = records.iter().map(|r| r.ticker.as_str()).collect();
    let members: Vec<&str> = records.iter().map(|r| r.member_name.as_str()).collect();
    let transactions: Vec<_> = records.iter().map(|r| r.transaction).collect();
    let trade_dates: Vec<_> = records.iter().map(|r| r.trade_date).collect();
    let filing_dates: Vec<_> = records.iter().map(|r| r.filing_date).collect();
    let parties: Vec<_> = records.iter().map(|r| r.party).collect();
    let raws: Vec<_> = records.iter().map(|r| r.raw.clone()).collect();

    let result = sqlx::query(
        r#"
        insert into congress_trade_feed
            (ticker, member_name, transaction, trade_date, filing_date, party, raw)
        select * from unnest($1::text[], $2::text[], $3::text[], $4::date[], $5::date[], $6::text[], $7::jsonb[])
        on conflict (ticker, member_name, filing_date, trade_date) do nothing
        "#,
    )
    .bind(&tickers)
    .bind(&members)
    .bind(transactions.iter().map(|t| format!("{:?}", t).to_uppercase()).collect::<Vec<_>>())
    .bind(&trade_dates)
    .bind(&filing_dates)
    .bind(parties.iter().map(|p| p.map(|p| format!("{:?}", p).to_uppercase())).collect::<Vec<_>>())
    .bind(&raws)
    .execute(exec)
    .await
    .map_err(map_db_error)?;

    Ok(result.rows_affected())
}

pub async fn list<'c, E>(
    exec: E,
    since: Option<DateTime<Utc>>,
    ticker: Option<&str>,
    limit: Option<i64>,
) -> Result<Vec<FilingRecord>, WorkerError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, FilingRecord>(
        r#"
        select * from congress_trade_feed
        where ($1::timestamptz is null or ingested_at >= $1)
          and ($2::text is null or ticker = $2)
        order by ingested_at desc
        limit $3
        "#,
    )
    .bind(since)
    .bind(ticker)
    .bind(limit.unwrap_or(100))
    .fetch_all(exec)
    .await
    .map_err(map_db_error)
}

pub async fn find_latest_filing_date<'c, E>(
    exec: E,
) -> Result<Option<chrono::NaiveDate>, WorkerError>
where
    E: PgExecutor<'c>,
{
    // `max()` over an empty (or fully-filtered) table still returns one row
    // whose value is SQL NULL - decode into `Option<NaiveDate>` rather than
    // `NaiveDate` so that row doesn't raise UnexpectedNullError.
    let row: (Option<chrono::NaiveDate>,) =
        sqlx::query_as("select max(filing_date) from congress_trade_feed")
            .fetch_one(exec)
            .await
            .map_err(map_db_error)?;
    Ok(row.0)
}
