//! Congressional-trade mirror worker: an idempotent, once-per-trading-day
//! pipeline that reads congressional stock disclosures and mirrors admitted
//! filings into a paper brokerage account.

pub mod broker;
pub mod cli;
pub mod config;
pub mod error;
pub mod feed;
pub mod guardrail;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod poller;
pub mod repo;
pub mod status;
pub mod submitter;
pub mod telemetry;
pub mod time;
