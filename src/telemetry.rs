//! Run-level counters surfaced in the job-run summary (SPEC_FULL.md §2, AMBIENT).
//!
//! This is not a metrics exporter — Non-goals exclude dashboard-facing
//! observability — but the job-run row's `summary_json` is in-scope persisted
//! data, so the counters it's built from get their own small module rather
//! than living as ad-hoc fields scattered through the orchestrator.

use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct WindowSummary {
    pub session_date: NaiveDate,
    pub filings_fetched: u32,
    pub filings_considered: u32,
    pub outside_window: u32,
    pub duplicates_skipped: u32,
    pub attempted: u32,
    pub submitted: u32,
    pub guardrail_blocked: u32,
    pub dry_run_skipped: u32,
    pub fallback_used: u32,
}

impl Default for WindowSummary {
    // `NaiveDate` has no `Default` impl in chrono 0.4, so this can't be
    // `#[derive(Default)]`. Callers always overwrite `session_date`
    // immediately (see `orchestrator::process_window`); this placeholder
    // is never observed.
    fn default() -> Self {
        WindowSummary {
            session_date: NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid epoch date"),
            filings_fetched: 0,
            filings_considered: 0,
            outside_window: 0,
            duplicates_skipped: 0,
            attempted: 0,
            submitted: 0,
            guardrail_blocked: 0,
            dry_run_skipped: 0,
            fallback_used: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub trading_date_et: NaiveDate,
    pub previous_window: WindowSummary,
    pub current_window: WindowSummary,
    pub errors: Vec<FilingError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilingError {
    pub symbol: String,
    pub source_hash: String,
    pub error: String,
}

impl JobSummary {
    pub fn empty(trading_date_et: NaiveDate) -> Self {
        JobSummary {
            trading_date_et,
            previous_window: WindowSummary::default(),
            current_window: WindowSummary::default(),
            errors: Vec::new(),
        }
    }
}
