//! Environment configuration (spec §6, AMBIENT per SPEC_FULL.md §2).
//!
//! Loaded once at startup via `dotenv` + `std::env`, the way the teacher's
//! `models::Config::from_env` does it. Required variables missing or
//! unparseable produce `WorkerError::EnvValidation` (exit code 2).

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::WorkerError;
use crate::guardrail::GuardrailConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub alpaca_key_id: String,
    pub alpaca_secret_key: String,
    pub quiver_api_key: String,

    pub trading_enabled: bool,
    pub paper_trading: bool,
    pub trade_notional_usd: Decimal,
    pub daily_max_filings: Option<u32>,
    pub per_ticker_daily_max: Option<u32>,

    pub alpaca_base_url: String,
    pub alpaca_data_base_url: String,
    pub quiver_base_url: String,

    pub log_level: String,
    pub node_env: String,
}

impl Config {
    /// Loads from the process environment, reading a `.env` file first if
    /// present (teacher pattern: `dotenv::dotenv().ok()` before any `env::var`
    /// call, never required in production where real env vars are set).
    pub fn from_env() -> Result<Self, WorkerError> {
        dotenv::dotenv().ok();

        let node_env = env_or("NODE_ENV", "development");
        let is_production = node_env.eq_ignore_ascii_case("production");

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            alpaca_key_id: require_env("ALPACA_KEY_ID")?,
            alpaca_secret_key: require_env("ALPACA_SECRET_KEY")?,
            quiver_api_key: require_env("QUIVER_API_KEY")?,

            // Spec §6: "default false outside production".
            trading_enabled: parse_env_or("TRADING_ENABLED", is_production)?,
            paper_trading: parse_env_or("PAPER_TRADING", true)?,
            trade_notional_usd: parse_env_or("TRADE_NOTIONAL_USD", Decimal::from(1000))?,
            daily_max_filings: optional_env_parsed("DAILY_MAX_FILINGS")?,
            per_ticker_daily_max: optional_env_parsed("PER_TICKER_DAILY_MAX")?,

            alpaca_base_url: env_or("ALPACA_BASE_URL", "https://paper-api.alpaca.markets"),
            alpaca_data_base_url: env_or("ALPACA_DATA_BASE_URL", "https://data.alpaca.markets"),
            quiver_base_url: env_or("QUIVER_BASE_URL", "https://api.quiverquant.com"),

            log_level: env_or("LOG_LEVEL", "info"),
            node_env,
        })
    }

    pub fn to_guardrail_config(&self) -> GuardrailConfig {
        GuardrailConfig {
            trading_enabled: self.trading_enabled,
            paper_trading: self.paper_trading,
            trade_notional_usd: self.trade_notional_usd,
            daily_max_filings: self.daily_max_filings,
            per_ticker_daily_max: self.per_ticker_daily_max,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn require_env(key: &str) -> Result<String, WorkerError> {
    std::env::var(key)
        .map_err(|_| WorkerError::EnvValidation(format!("missing required environment variable {key}")))
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T, WorkerError>
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| WorkerError::EnvValidation(format!("invalid value for {key}: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn optional_env_parsed<T>(key: &str) -> Result<Option<T>, WorkerError>
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| WorkerError::EnvValidation(format!("invalid value for {key}: {raw:?}"))),
        Err(_) => Ok(None),
    }
}
