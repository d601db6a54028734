use std::process::ExitCode;

use capitol_mirror::broker::AlpacaClient;
use capitol_mirror::cli::{Cli, Command};
use capitol_mirror::config::Config;
use capitol_mirror::error::WorkerError;
use capitol_mirror::feed::FeedClient;
use capitol_mirror::logging;
use capitol_mirror::orchestrator;
use capitol_mirror::repo;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            error!(error = %err, "open job exited with an error");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

async fn run() -> Result<(), WorkerError> {
    let cli = Cli::parse();

    logging::init(&std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));

    let config = Config::from_env()?;

    let pool = repo::connect_and_migrate(&config.database_url)
        .await
        .map_err(WorkerError::Unexpected)?;

    let feed_client = FeedClient::new(config.quiver_base_url.clone(), &config.quiver_api_key)
        .map_err(WorkerError::Unexpected)?;
    let broker = AlpacaClient::new(
        config.alpaca_base_url.clone(),
        config.alpaca_data_base_url.clone(),
        &config.alpaca_key_id,
        &config.alpaca_secret_key,
    )
    .map_err(WorkerError::Unexpected)?;

    let cancellation = CancellationToken::new();
    let shutdown = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal, finishing in-flight work before exiting");
            shutdown.cancel();
        }
    });

    let Command::OpenJob { dry_run } = cli.command;

    let guardrail_config = config.to_guardrail_config();
    let now = chrono::Utc::now();

    let outcome = orchestrator::run_open_job(
        &pool,
        &feed_client,
        &broker,
        &guardrail_config,
        now,
        dry_run,
        &cancellation,
    )
    .await?;

    if outcome.failed {
        return Err(WorkerError::Unexpected(anyhow::anyhow!(
            "job run for {} finished FAILED",
            outcome.trading_date_et
        )));
    }

    Ok(())
}
