//! Open-Job Orchestrator (spec §4.9).
//!
//! Grounded on `main.rs`'s top-level orchestration style - a struct holding
//! shared clients, a sequential `.await` pipeline, `tracing` fields on every
//! log line - but exposed as a library function called from a thin
//! `main.rs`/`cli.rs` rather than a long-lived server.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::error::WorkerError;
use crate::feed::{self, Feed};
use crate::guardrail::GuardrailConfig;
use crate::models::{JobRunType, NewFilingRecord, TradeStatus, TransactionKind};
use crate::planner::{self, TradingWindow};
use crate::repo::{checkpoints as checkpoint_repo, feed as feed_repo, job_runs as job_run_repo};
use crate::submitter::{self, SubmitForFilingRequest};
use crate::telemetry::{FilingError, JobSummary, WindowSummary};
use crate::time;

pub struct OpenJobOutcome {
    pub trading_date_et: NaiveDate,
    pub summary: JobSummary,
    pub failed: bool,
}

/// Runs the once-per-trading-day mirror pipeline: plan windows, fetch and
/// normalize filings per civil day, admit new ones past each window's
/// checkpoint, submit through the guardrail/broker/poller chain, and
/// finalize the job-run row as `SUCCESS` or `FAILED` (spec §4.9).
///
/// Per-filing errors never abort the run (spec §9, "partial-failure
/// accounting"); only a failure reaching this function from outside the
/// per-filing loop (planner, feed fetch, job-run bookkeeping) marks the
/// job-run `FAILED`.
pub async fn run_open_job(
    pool: &PgPool,
    feed_client: &dyn Feed,
    broker: &dyn Broker,
    guardrail_config: &GuardrailConfig,
    now: DateTime<Utc>,
    dry_run: bool,
    cancellation: &CancellationToken,
) -> Result<OpenJobOutcome, WorkerError> {
    let trading_date_et = time::eastern_date(now);

    let job_run = job_run_repo::start(pool, JobRunType::OpenJob, trading_date_et).await?;
    info!(trading_date = %trading_date_et, job_run_id = %job_run.id, dry_run, "open job started");

    match run_inner(pool, feed_client, broker, guardrail_config, now, dry_run, cancellation).await {
        Ok(summary) => {
            let summary_json = serde_json::to_value(&summary)
                .map_err(|e| WorkerError::Unexpected(anyhow::anyhow!(e)))?;
            job_run_repo::complete(pool, job_run.id, summary_json).await?;
            info!(trading_date = %trading_date_et, "open job finished: SUCCESS");
            Ok(OpenJobOutcome {
                trading_date_et,
                summary,
                failed: false,
            })
        }
        Err((summary, err)) => {
            let summary_json = serde_json::to_value(&summary)
                .unwrap_or(serde_json::Value::Null);
            job_run_repo::fail(pool, job_run.id, summary_json.clone()).await?;
            error!(trading_date = %trading_date_et, error = %err, "open job finished: FAILED");
            Ok(OpenJobOutcome {
                trading_date_et,
                summary,
                failed: true,
            })
        }
    }
}

async fn run_inner(
    pool: &PgPool,
    feed_client: &dyn Feed,
    broker: &dyn Broker,
    guardrail_config: &GuardrailConfig,
    now: DateTime<Utc>,
    dry_run: bool,
    cancellation: &CancellationToken,
) -> Result<JobSummary, (JobSummary, WorkerError)> {
    let trading_date_et = time::eastern_date(now);

    let clock = broker
        .get_clock()
        .await
        .map_err(|e| (empty_summary(trading_date_et), e))?;
    let calendar_start = time::add_eastern_days(now, -10);
    let calendar_end = time::add_eastern_days(now, 1);
    let calendar = broker
        .get_calendar(
            Some(time::eastern_date(calendar_start)),
            Some(time::eastern_date(calendar_end)),
        )
        .await
        .map_err(|e| (empty_summary(trading_date_et), e))?;

    let plan = planner::plan(now, &calendar, &clock)
        .map_err(|e| (empty_summary(trading_date_et), WorkerError::Unexpected(e)))?;

    let mut errors = Vec::new();

    let previous_owned_days = vec![plan.previous_window.session_date];
    let current_owned_days: Vec<NaiveDate> = plan
        .fetch_days
        .iter()
        .copied()
        .filter(|d| *d != plan.previous_window.session_date)
        .collect();

    let previous_summary = process_window(
        pool,
        feed_client,
        broker,
        guardrail_config,
        &plan.previous_window,
        &previous_owned_days,
        dry_run,
        cancellation,
        &mut errors,
    )
    .await;

    let current_summary = process_window(
        pool,
        feed_client,
        broker,
        guardrail_config,
        &plan.current_window,
        &current_owned_days,
        dry_run,
        cancellation,
        &mut errors,
    )
    .await;

    Ok(JobSummary {
        trading_date_et,
        previous_window: previous_summary,
        current_window: current_summary,
        errors,
    })
}

/// A filing that survived normalization and the BUY-only drop, tagged with
/// its computed `filed_ts` and whether it fell inside this window's owned
/// civil days (spec §4.9 step b).
struct CandidateFiling {
    record: NewFilingRecord,
    filed_ts: DateTime<Utc>,
    in_window: bool,
}

#[allow(clippy::too_many_arguments)]
async fn process_window(
    pool: &PgPool,
    feed_client: &dyn Feed,
    broker: &dyn Broker,
    guardrail_config: &GuardrailConfig,
    window: &TradingWindow,
    owned_days: &[NaiveDate],
    dry_run: bool,
    cancellation: &CancellationToken,
    errors: &mut Vec<FilingError>,
) -> WindowSummary {
    let mut summary = WindowSummary {
        session_date: window.session_date,
        ..Default::default()
    };

    let checkpoint = match checkpoint_repo::get(pool, window.session_date).await {
        Ok(c) => c,
        Err(e) => {
            warn!(session_date = %window.session_date, error = %e, "failed to load checkpoint, treating as absent");
            None
        }
    };
    let cutoff = checkpoint.and_then(|c| c.last_filed_ts_processed_et);
    let mut high_water = cutoff;

    let mut to_persist: Vec<NewFilingRecord> = Vec::new();
    let mut admitted: Vec<CandidateFiling> = Vec::new();

    for day in owned_days {
        if cancellation.is_cancelled() {
            warn!("cancellation requested, stopping window processing early");
            break;
        }

        let raws = match feed_client.get_filings_by_date(*day).await {
            Ok(r) => r,
            Err(e) => {
                warn!(day = %day, error = %e, "feed fetch failed for this civil day");
                errors.push(FilingError {
                    symbol: String::new(),
                    source_hash: String::new(),
                    error: format!("feed fetch failed for {day}: {e}"),
                });
                continue;
            }
        };

        summary.filings_fetched += raws.len() as u32;

        // Drop missing-field rows (spec §4.9: counted under fetched, not
        // considered) then non-BUY rows (spec §4.9: "non-BUY is never
        // traded" - dropped before any persistence or counting).
        let normalized = raws
            .iter()
            .filter_map(feed::normalize)
            .filter(|r| r.transaction == TransactionKind::Buy);

        for record in normalized {
            let filed_ts = time::create_eastern_date(
                record.filing_date.year(),
                record.filing_date.month(),
                record.filing_date.day(),
                0,
                0,
                0,
                0,
            )
            .unwrap_or_else(Utc::now);

            if let Some(cutoff) = cutoff {
                if filed_ts <= cutoff {
                    summary.duplicates_skipped += 1;
                    continue;
                }
            }

            let in_window = owned_days.contains(&record.filing_date);
            if in_window {
                summary.filings_considered += 1;
            } else {
                summary.outside_window += 1;
            }
            high_water = Some(high_water.map_or(filed_ts, |h| h.max(filed_ts)));

            to_persist.push(record.clone());
            admitted.push(CandidateFiling {
                record,
                filed_ts,
                in_window,
            });
        }
    }

    if !to_persist.is_empty() {
        if let Err(e) = feed_repo::create_many(pool, &to_persist).await {
            warn!(session_date = %window.session_date, error = %e, "failed to persist normalized filings");
        }
    }

    // Step c (spec §4.9): dedup the in-window filings by source_hash, keeping
    // the earliest filed_ts, before handing them to the submitter.
    let mut by_hash: std::collections::HashMap<String, CandidateFiling> = std::collections::HashMap::new();
    let mut arrival_order: Vec<String> = Vec::new();
    for candidate in admitted.into_iter().filter(|c| c.in_window) {
        let hash = candidate.record.source_hash();
        match by_hash.get(&hash) {
            Some(existing) if existing.filed_ts <= candidate.filed_ts => {}
            _ => {
                if !arrival_order.contains(&hash) {
                    arrival_order.push(hash.clone());
                }
                by_hash.insert(hash, candidate);
            }
        }
    }

    for hash in arrival_order {
        let candidate = by_hash.remove(&hash).expect("hash was just inserted above");
        let record = candidate.record;

        if dry_run {
            summary.dry_run_skipped += 1;
            continue;
        }

        let source_hash = record.source_hash();
        summary.attempted += 1;
        let result = submitter::submit_for_filing(
            pool,
            broker,
            guardrail_config,
            SubmitForFilingRequest {
                symbol: record.ticker.clone(),
                source_hash: source_hash.clone(),
                client_order_id: None,
                congress_trade_feed_id: None,
                window_start: window.open,
                window_end: window.close,
            },
        )
        .await;

        match result {
            Ok(outcome) => {
                if outcome.guardrail_blocked {
                    summary.guardrail_blocked += 1;
                }
                // spec §4.9 step e: submitted is gated on the returned status,
                // not on whether a guardrail fired - a broker status that maps
                // to FAILED (suspended/calculated/unknown) is not a submission
                // even though no guardrail blocked it.
                if outcome.status != TradeStatus::Failed {
                    summary.submitted += 1;
                }
                if outcome.fallback_used {
                    summary.fallback_used += 1;
                }
            }
            Err(e) => {
                errors.push(FilingError {
                    symbol: record.ticker.clone(),
                    source_hash,
                    error: e.to_string(),
                });
            }
        }
    }

    // spec §3/§4.4: a window's checkpoint is upserted once per job run
    // regardless of whether it observed a new high-water timestamp.
    if let Err(e) = checkpoint_repo::upsert(pool, window.session_date, high_water).await {
        warn!(session_date = %window.session_date, error = %e, "failed to upsert checkpoint");
    }

    summary
}

fn empty_summary(trading_date_et: NaiveDate) -> JobSummary {
    JobSummary::empty(trading_date_et)
}
