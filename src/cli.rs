//! CLI surface (spec §6, AMBIENT).
//!
//! The teacher already depends on `clap` with the `derive`/`env` features;
//! this crate's surface is intentionally narrow: one job, run once per
//! invocation (an external scheduler decides cadence).

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "capitol-mirror", about = "Mirrors congressional stock disclosures into a paper brokerage account")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the once-per-trading-day open-job pipeline.
    OpenJob {
        /// Plan and log without submitting any orders.
        #[arg(long)]
        dry_run: bool,
    },
}
