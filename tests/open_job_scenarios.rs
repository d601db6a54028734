//! End-to-end exercises of the six numbered scenarios in spec.md §8, run
//! against a real (ephemeral, per-test) Postgres database via `sqlx::test`
//! and fake `Feed`/`Broker` collaborators — the teacher's established
//! trait-object-behind-`async_trait` pattern for swappable dependencies
//! (SPEC_FULL.md §9).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use capitol_mirror::broker::{Broker, BrokerOrder, CalendarEntry, ClockResponse, SubmitOrderRequest};
use capitol_mirror::error::WorkerError;
use capitol_mirror::feed::{Feed, RawFiling};
use capitol_mirror::guardrail::GuardrailConfig;
use capitol_mirror::models::{TradeAttempt, TradeStatus};
use capitol_mirror::orchestrator::run_open_job;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn filing(ticker: &str, member: &str, filed: &str) -> RawFiling {
    RawFiling {
        ticker: Some(ticker.to_string()),
        name: Some(member.to_string()),
        transaction: Some("Purchase".to_string()),
        filed: Some(filed.to_string()),
        traded: None,
        party: Some("D".to_string()),
        extra: Default::default(),
    }
}

fn calendar_entry(y: i32, m: u32, d: u32, open: &str, close: &str) -> CalendarEntry {
    CalendarEntry {
        date: date(y, m, d),
        open: Some(open.to_string()),
        close: Some(close.to_string()),
        session_open: None,
        session_close: None,
    }
}

fn base_guardrail_config() -> GuardrailConfig {
    GuardrailConfig {
        trading_enabled: true,
        paper_trading: true,
        trade_notional_usd: dec!(1000),
        daily_max_filings: None,
        per_ticker_daily_max: None,
    }
}

/// Records every civil day it was asked about and returns canned fixtures.
struct FakeFeed {
    fixtures: HashMap<NaiveDate, Vec<RawFiling>>,
    calls: Mutex<Vec<NaiveDate>>,
}

impl FakeFeed {
    fn new(fixtures: HashMap<NaiveDate, Vec<RawFiling>>) -> Self {
        Self {
            fixtures,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn called_dates(&self) -> Vec<NaiveDate> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Feed for FakeFeed {
    async fn get_filings_by_date(&self, civil_day: NaiveDate) -> Result<Vec<RawFiling>, WorkerError> {
        self.calls.lock().unwrap().push(civil_day);
        Ok(self.fixtures.get(&civil_day).cloned().unwrap_or_default())
    }
}

/// Deterministic broker double: every accepted submission is immediately
/// `filled`, so the poller's first `get_order` call already observes a
/// terminal status and returns without sleeping.
struct FakeBroker {
    clock: ClockResponse,
    calendar: Vec<CalendarEntry>,
    latest_trade: HashMap<String, Decimal>,
    fractional_reject: HashSet<String>,
    insufficient_funds: HashSet<String>,
    orders: Mutex<HashMap<String, BrokerOrder>>,
    submitted: Mutex<Vec<SubmitOrderRequest>>,
}

impl FakeBroker {
    fn new(clock: ClockResponse, calendar: Vec<CalendarEntry>) -> Self {
        Self {
            clock,
            calendar,
            latest_trade: HashMap::new(),
            fractional_reject: HashSet::new(),
            insufficient_funds: HashSet::new(),
            orders: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    fn submitted_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn submit_order(&self, req: SubmitOrderRequest) -> Result<BrokerOrder, WorkerError> {
        self.submitted.lock().unwrap().push(req.clone());

        if self.insufficient_funds.contains(&req.symbol) {
            return Err(WorkerError::BrokerInsufficientFunds {
                message: "account does not have sufficient buying power".to_string(),
            });
        }

        if req.notional.is_some() && self.fractional_reject.contains(&req.symbol) {
            return Err(WorkerError::BrokerValidation {
                message: "fractional qty not supported".to_string(),
                violations: vec!["fractional qty not supported".to_string()],
            });
        }

        let mut orders = self.orders.lock().unwrap();
        let id = format!("order-{}", orders.len() + 1);
        let order = BrokerOrder {
            id: id.clone(),
            client_order_id: req.client_order_id.clone(),
            status: "filled".to_string(),
            submitted_at: Some(Utc::now()),
            filled_at: Some(Utc::now()),
            filled_qty: req.qty.clone().or_else(|| Some("1".to_string())),
            filled_avg_price: Some("100.00".to_string()),
            notional: req.notional.clone(),
            qty: req.qty.clone(),
            extra: Default::default(),
        };
        orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, broker_order_id: &str) -> Result<BrokerOrder, WorkerError> {
        self.orders
            .lock()
            .unwrap()
            .get(broker_order_id)
            .cloned()
            .ok_or_else(|| WorkerError::Unexpected(anyhow::anyhow!("no such order {broker_order_id}")))
    }

    async fn get_order_by_client_id(&self, client_order_id: &str) -> Result<BrokerOrder, WorkerError> {
        self.orders
            .lock()
            .unwrap()
            .values()
            .find(|o| o.client_order_id == client_order_id)
            .cloned()
            .ok_or_else(|| WorkerError::Unexpected(anyhow::anyhow!("no order for client id {client_order_id}")))
    }

    async fn get_latest_trade(&self, symbol: &str) -> Result<Decimal, WorkerError> {
        self.latest_trade
            .get(symbol)
            .copied()
            .ok_or_else(|| WorkerError::Unexpected(anyhow::anyhow!("no latest trade fixture for {symbol}")))
    }

    async fn get_clock(&self) -> Result<ClockResponse, WorkerError> {
        Ok(self.clock.clone())
    }

    async fn get_calendar(
        &self,
        _start: Option<NaiveDate>,
        _end: Option<NaiveDate>,
    ) -> Result<Vec<CalendarEntry>, WorkerError> {
        Ok(self.calendar.clone())
    }
}

fn open_session_calendar() -> Vec<CalendarEntry> {
    vec![
        calendar_entry(2024, 2, 15, "09:30", "16:00"),
        calendar_entry(2024, 2, 16, "09:30", "16:00"),
    ]
}

fn market_open_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 16, 14, 30, 0).unwrap()
}

async fn trade_count(pool: &PgPool) -> i64 {
    sqlx::query_as::<_, (i64,)>("select count(*) from trade")
        .fetch_one(pool)
        .await
        .unwrap()
        .0
}

async fn job_run_count(pool: &PgPool) -> i64 {
    sqlx::query_as::<_, (i64,)>("select count(*) from job_run")
        .fetch_one(pool)
        .await
        .unwrap()
        .0
}

/// Scenario 1 (spec §8): re-running the job for a day that was already
/// fully processed submits nothing new and leaves exactly one `trade` row
/// per distinct filing.
#[sqlx::test(migrations = "./migrations")]
async fn rerun_on_same_trading_date_is_idempotent(pool: PgPool) -> anyhow::Result<()> {
    let now = market_open_now();
    let clock = ClockResponse {
        timestamp: now,
        is_open: true,
        next_open: now,
        next_close: Utc.with_ymd_and_hms(2024, 2, 16, 21, 0, 0).unwrap(),
    };

    let mut fixtures = HashMap::new();
    fixtures.insert(
        date(2024, 2, 15),
        vec![
            filing("AAPL", "Nancy Pelosi", "2024-02-15"),
            filing("MSFT", "Dan Crenshaw", "2024-02-15"),
        ],
    );
    fixtures.insert(date(2024, 2, 16), vec![filing("GOOGL", "Ro Khanna", "2024-02-16")]);

    let feed = FakeFeed::new(fixtures);
    let broker = FakeBroker::new(clock, open_session_calendar());
    let config = base_guardrail_config();

    let first = run_open_job(&pool, &feed, &broker, &config, now, false, &CancellationToken::new())
        .await?;
    assert!(!first.failed);
    assert_eq!(trade_count(&pool).await, 3);
    assert_eq!(job_run_count(&pool).await, 1);

    let second = run_open_job(&pool, &feed, &broker, &config, now, false, &CancellationToken::new())
        .await?;
    assert!(!second.failed);
    assert_eq!(trade_count(&pool).await, 3, "re-run must not create new trade rows");
    assert_eq!(job_run_count(&pool).await, 1, "at most one job_run row per trading date");
    assert_eq!(second.summary.previous_window.filings_considered, 0);
    assert_eq!(second.summary.current_window.filings_considered, 0);
    assert_eq!(broker.submitted_count(), 3, "no additional broker submissions on re-run");

    Ok(())
}

/// Scenario 2 (spec §8): a filing dated after the current session is
/// fetched but dropped as outside the trading window, and never submitted.
#[sqlx::test(migrations = "./migrations")]
async fn filing_outside_trading_window_is_dropped(pool: PgPool) -> anyhow::Result<()> {
    let now = market_open_now();
    let clock = ClockResponse {
        timestamp: now,
        is_open: true,
        next_open: now,
        next_close: Utc.with_ymd_and_hms(2024, 2, 16, 21, 0, 0).unwrap(),
    };

    let mut fixtures = HashMap::new();
    fixtures.insert(date(2024, 2, 16), vec![filing("TSLA", "Someone", "2024-02-17")]);

    let feed = FakeFeed::new(fixtures);
    let broker = FakeBroker::new(clock, open_session_calendar());
    let config = base_guardrail_config();

    let outcome = run_open_job(&pool, &feed, &broker, &config, now, false, &CancellationToken::new())
        .await?;
    assert!(!outcome.failed);

    let fetched = outcome.summary.previous_window.filings_fetched + outcome.summary.current_window.filings_fetched;
    let outside = outcome.summary.previous_window.outside_window + outcome.summary.current_window.outside_window;
    let considered =
        outcome.summary.previous_window.filings_considered + outcome.summary.current_window.filings_considered;
    let submitted = outcome.summary.previous_window.submitted + outcome.summary.current_window.submitted;

    assert_eq!(fetched, 1);
    assert_eq!(outside, 1);
    assert_eq!(considered, 0);
    assert_eq!(submitted, 0);
    assert_eq!(trade_count(&pool).await, 0, "an outside-window filing is never submitted");
    assert_eq!(broker.submitted_count(), 0);

    Ok(())
}

/// Scenario 3 (spec §8): weekend/holiday civil days between two trading
/// sessions still get fetched (dry run, so nothing is actually submitted).
#[sqlx::test(migrations = "./migrations")]
async fn weekend_and_holiday_days_are_fetched_in_dry_run(pool: PgPool) -> anyhow::Result<()> {
    let now = Utc.with_ymd_and_hms(2024, 2, 19, 14, 29, 55).unwrap();
    let clock = ClockResponse {
        timestamp: now,
        is_open: false,
        next_open: Utc.with_ymd_and_hms(2024, 2, 20, 14, 30, 0).unwrap(),
        next_close: Utc.with_ymd_and_hms(2024, 2, 20, 21, 0, 0).unwrap(),
    };
    let calendar = vec![
        calendar_entry(2024, 2, 16, "09:30", "16:00"),
        calendar_entry(2024, 2, 20, "09:30", "16:00"),
    ];

    let mut fixtures = HashMap::new();
    fixtures.insert(date(2024, 2, 17), vec![filing("NFLX", "Someone", "2024-02-17")]);
    fixtures.insert(date(2024, 2, 18), vec![filing("DIS", "Someone Else", "2024-02-18")]);

    let feed = FakeFeed::new(fixtures);
    let broker = FakeBroker::new(clock, calendar);
    let config = base_guardrail_config();

    let outcome = run_open_job(&pool, &feed, &broker, &config, now, true, &CancellationToken::new())
        .await?;
    assert!(!outcome.failed);

    let called = feed.called_dates();
    for d in [date(2024, 2, 17), date(2024, 2, 18), date(2024, 2, 19)] {
        assert!(called.contains(&d), "expected feed fetch for {d}, got {called:?}");
    }

    assert!(outcome.summary.current_window.filings_considered >= 2);
    assert!(outcome.summary.current_window.dry_run_skipped >= 2);
    assert_eq!(trade_count(&pool).await, 0, "dry run never creates trade rows");
    assert_eq!(broker.submitted_count(), 0);

    Ok(())
}

/// Scenario 4 (spec §8): a notional order rejected as fractional falls back
/// to a whole-share quantity order at the latest trade price.
#[sqlx::test(migrations = "./migrations")]
async fn fractional_rejection_falls_back_to_whole_shares(pool: PgPool) -> anyhow::Result<()> {
    let now = market_open_now();
    let clock = ClockResponse {
        timestamp: now,
        is_open: true,
        next_open: now,
        next_close: Utc.with_ymd_and_hms(2024, 2, 16, 21, 0, 0).unwrap(),
    };

    let mut fixtures = HashMap::new();
    fixtures.insert(date(2024, 2, 16), vec![filing("BRK.B", "Someone", "2024-02-16")]);

    let feed = FakeFeed::new(fixtures);
    let mut broker = FakeBroker::new(clock, open_session_calendar());
    broker.fractional_reject.insert("BRK.B".to_string());
    broker.latest_trade.insert("BRK.B".to_string(), dec!(310));
    let config = base_guardrail_config();

    let outcome = run_open_job(&pool, &feed, &broker, &config, now, false, &CancellationToken::new())
        .await?;
    assert!(!outcome.failed);
    assert_eq!(outcome.summary.current_window.fallback_used, 1);

    let trade = sqlx::query_as::<_, TradeAttempt>("select * from trade where symbol = $1")
        .bind("BRK.B")
        .fetch_one(&pool)
        .await?;
    assert!(trade.notional_submitted.is_none());
    assert_eq!(trade.qty_submitted, Some(dec!(3)));
    assert_eq!(trade.status, TradeStatus::Filled);

    Ok(())
}

/// Scenario 5 (spec §8): a broker insufficient-funds failure marks the
/// attempt FAILED and is recorded as a per-filing error, but the run still
/// completes as SUCCESS.
#[sqlx::test(migrations = "./migrations")]
async fn insufficient_funds_is_a_per_filing_error_not_a_run_failure(pool: PgPool) -> anyhow::Result<()> {
    let now = market_open_now();
    let clock = ClockResponse {
        timestamp: now,
        is_open: true,
        next_open: now,
        next_close: Utc.with_ymd_and_hms(2024, 2, 16, 21, 0, 0).unwrap(),
    };

    let mut fixtures = HashMap::new();
    fixtures.insert(date(2024, 2, 16), vec![filing("AAPL", "Someone", "2024-02-16")]);

    let feed = FakeFeed::new(fixtures);
    let mut broker = FakeBroker::new(clock, open_session_calendar());
    broker.insufficient_funds.insert("AAPL".to_string());
    let config = base_guardrail_config();

    let outcome = run_open_job(&pool, &feed, &broker, &config, now, false, &CancellationToken::new())
        .await?;
    assert!(!outcome.failed, "per-filing errors must not fail the job run");
    assert_eq!(outcome.summary.errors.len(), 1);

    let trade = sqlx::query_as::<_, TradeAttempt>("select * from trade where symbol = $1")
        .bind("AAPL")
        .fetch_one(&pool)
        .await?;
    assert_eq!(trade.status, TradeStatus::Failed);
    assert!(trade.failed_at.is_some());

    Ok(())
}

/// Scenario 6 (spec §8): with trading disabled, the guardrail blocks before
/// the broker is ever called.
#[sqlx::test(migrations = "./migrations")]
async fn trading_disabled_blocks_before_broker_is_called(pool: PgPool) -> anyhow::Result<()> {
    let now = market_open_now();
    let clock = ClockResponse {
        timestamp: now,
        is_open: true,
        next_open: now,
        next_close: Utc.with_ymd_and_hms(2024, 2, 16, 21, 0, 0).unwrap(),
    };

    let mut fixtures = HashMap::new();
    fixtures.insert(date(2024, 2, 16), vec![filing("AAPL", "Someone", "2024-02-16")]);

    let feed = FakeFeed::new(fixtures);
    let broker = FakeBroker::new(clock, open_session_calendar());
    let mut config = base_guardrail_config();
    config.trading_enabled = false;

    let outcome = run_open_job(&pool, &feed, &broker, &config, now, false, &CancellationToken::new())
        .await?;
    assert!(!outcome.failed);
    assert_eq!(outcome.summary.current_window.guardrail_blocked, 1);
    assert_eq!(outcome.summary.current_window.submitted, 0);
    assert_eq!(broker.submitted_count(), 0, "broker must never be called while trading is disabled");

    let trade = sqlx::query_as::<_, TradeAttempt>("select * from trade where symbol = $1")
        .bind("AAPL")
        .fetch_one(&pool)
        .await?;
    assert_eq!(trade.status, TradeStatus::Failed);

    Ok(())
}
