//! Guardrail Evaluator (spec §4.5) — a pure function, never throws.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct GuardrailConfig {
    pub trading_enabled: bool,
    pub paper_trading: bool,
    pub trade_notional_usd: Decimal,
    pub daily_max_filings: Option<u32>,
    pub per_ticker_daily_max: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct GuardrailContext {
    pub trading_date_window_start: DateTime<Utc>,
    pub trading_date_window_end: DateTime<Utc>,
    pub ticker: String,
    pub trades_submitted_today: u32,
    pub trades_submitted_today_for_ticker: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardrailName {
    TradingDisabled,
    DailyMaxFilings,
    PerTickerDailyMax,
}

impl GuardrailName {
    pub fn as_str(self) -> &'static str {
        match self {
            GuardrailName::TradingDisabled => "TRADING_DISABLED",
            GuardrailName::DailyMaxFilings => "DAILY_MAX_FILINGS",
            GuardrailName::PerTickerDailyMax => "PER_TICKER_DAILY_MAX",
        }
    }
}

#[derive(Debug, Clone)]
pub enum GuardrailDecision {
    Allowed,
    Denied {
        guard: GuardrailName,
        message: String,
    },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardrailDecision::Allowed)
    }
}

/// Evaluates guardrails in order, first failure wins (spec §4.5).
pub fn evaluate(config: &GuardrailConfig, ctx: &GuardrailContext) -> GuardrailDecision {
    if !config.trading_enabled {
        return GuardrailDecision::Denied {
            guard: GuardrailName::TradingDisabled,
            message: "trading is disabled".to_string(),
        };
    }

    if let Some(max) = config.daily_max_filings {
        if ctx.trades_submitted_today >= max {
            return GuardrailDecision::Denied {
                guard: GuardrailName::DailyMaxFilings,
                message: format!(
                    "daily max filings reached ({} >= {})",
                    ctx.trades_submitted_today, max
                ),
            };
        }
    }

    if let Some(max) = config.per_ticker_daily_max {
        if ctx.trades_submitted_today_for_ticker >= max {
            return GuardrailDecision::Denied {
                guard: GuardrailName::PerTickerDailyMax,
                message: format!(
                    "per-ticker daily max reached for {} ({} >= {})",
                    ctx.ticker, ctx.trades_submitted_today_for_ticker, max
                ),
            };
        }
    }

    GuardrailDecision::Allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ctx() -> GuardrailContext {
        GuardrailContext {
            trading_date_window_start: Utc::now(),
            trading_date_window_end: Utc::now(),
            ticker: "AAPL".to_string(),
            trades_submitted_today: 0,
            trades_submitted_today_for_ticker: 0,
        }
    }

    fn base_config() -> GuardrailConfig {
        GuardrailConfig {
            trading_enabled: true,
            paper_trading: true,
            trade_notional_usd: dec!(1000),
            daily_max_filings: None,
            per_ticker_daily_max: None,
        }
    }

    #[test]
    fn trading_disabled_wins_first() {
        let mut config = base_config();
        config.trading_enabled = false;
        config.daily_max_filings = Some(0);
        let decision = evaluate(&config, &ctx());
        match decision {
            GuardrailDecision::Denied { guard, .. } => assert_eq!(guard, GuardrailName::TradingDisabled),
            _ => panic!("expected denied"),
        }
    }

    #[test]
    fn daily_max_filings_blocks_at_threshold() {
        let mut config = base_config();
        config.daily_max_filings = Some(2);
        let mut context = ctx();
        context.trades_submitted_today = 2;
        let decision = evaluate(&config, &context);
        match decision {
            GuardrailDecision::Denied { guard, .. } => assert_eq!(guard, GuardrailName::DailyMaxFilings),
            _ => panic!("expected denied"),
        }
    }

    #[test]
    fn per_ticker_max_checked_after_daily_max() {
        let mut config = base_config();
        config.daily_max_filings = Some(10);
        config.per_ticker_daily_max = Some(1);
        let mut context = ctx();
        context.trades_submitted_today = 1;
        context.trades_submitted_today_for_ticker = 1;
        let decision = evaluate(&config, &context);
        match decision {
            GuardrailDecision::Denied { guard, .. } => assert_eq!(guard, GuardrailName::PerTickerDailyMax),
            _ => panic!("expected denied"),
        }
    }

    #[test]
    fn allows_when_under_all_limits() {
        let mut config = base_config();
        config.daily_max_filings = Some(10);
        config.per_ticker_daily_max = Some(5);
        assert!(evaluate(&config, &ctx()).is_allowed());
    }
}
