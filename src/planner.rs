//! Window Planner (spec §4.8).
//!
//! Grounded on `backtest_v2/time_windows.rs`'s "single source of truth"
//! window-boundary philosophy - centralized constants, one function owning
//! the math - generalized here from fixed 15-minute buckets to calendar-driven
//! trading-session windows.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::US::Eastern;
use chrono_tz::Tz;

use crate::broker::{CalendarEntry, ClockResponse};
use crate::time::eastern_date;

#[derive(Debug, Clone)]
pub struct TradingWindow {
    pub session_date: NaiveDate,
    pub open: DateTime<Utc>,
    pub close: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WindowPlan {
    pub previous_window: TradingWindow,
    pub current_window: TradingWindow,
    pub fetch_days: Vec<NaiveDate>,
}

/// Builds `{previous_window, current_window, fetch_days[]}` from `now`, a
/// calendar range spanning at least the previous session through `now + 1
/// day`, and the broker's current clock reading (spec §4.8).
pub fn plan(
    now: DateTime<Utc>,
    calendar: &[CalendarEntry],
    clock: &ClockResponse,
) -> anyhow::Result<WindowPlan> {
    let today = eastern_date(now);

    let mut sorted: Vec<&CalendarEntry> = calendar.iter().collect();
    sorted.sort_by_key(|c| c.date);

    let current_entry = sorted
        .iter()
        .find(|c| c.date == today && session_contains(c, now))
        .or_else(|| sorted.iter().find(|c| c.date == eastern_date(clock.next_open)))
        .copied()
        .ok_or_else(|| anyhow::anyhow!("no current trading session found for {today}"))?;

    let previous_entry = sorted
        .iter()
        .filter(|c| c.date < current_entry.date)
        .max_by_key(|c| c.date)
        .copied()
        .ok_or_else(|| anyhow::anyhow!("no previous trading session found before {}", current_entry.date))?;

    let current_window = session_window(current_entry)?;
    let previous_window = session_window(previous_entry)?;

    let mut fetch_days = Vec::new();
    let mut d = previous_entry.date;
    while d <= current_entry.date {
        fetch_days.push(d);
        d = d.succ_opt().expect("civil date overflow");
    }

    Ok(WindowPlan {
        previous_window,
        current_window,
        fetch_days,
    })
}

fn session_contains(entry: &CalendarEntry, now: DateTime<Utc>) -> bool {
    match session_window(entry) {
        Ok(w) => now >= w.open && now <= w.close,
        Err(_) => false,
    }
}

/// The trading window for one calendar entry: prefers `session_open`/
/// `session_close` when present, else falls back to `open`/`close` (spec
/// §4.8 step 3), interpreted on the session's date in Eastern time.
fn session_window(entry: &CalendarEntry) -> anyhow::Result<TradingWindow> {
    let open_str = entry
        .session_open
        .as_deref()
        .or(entry.open.as_deref())
        .ok_or_else(|| anyhow::anyhow!("calendar entry for {} has no open time", entry.date))?;
    let close_str = entry
        .session_close
        .as_deref()
        .or(entry.close.as_deref())
        .ok_or_else(|| anyhow::anyhow!("calendar entry for {} has no close time", entry.date))?;

    let open = eastern_instant_on(entry.date, open_str)?;
    let close = eastern_instant_on(entry.date, close_str)?;

    Ok(TradingWindow {
        session_date: entry.date,
        open,
        close,
    })
}

/// Parses an `HH:MM` wall-clock reading on `date` in Eastern time.
fn eastern_instant_on(date: NaiveDate, hhmm: &str) -> anyhow::Result<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(hhmm, "%H:%M")
        .map_err(|e| anyhow::anyhow!("invalid session time {hhmm:?}: {e}"))?;
    let naive = date.and_time(time);
    let et: DateTime<Tz> = Eastern
        .from_local_datetime(&naive)
        .single()
        .unwrap_or_else(|| Eastern.from_utc_datetime(&naive));
    Ok(et.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::create_eastern_date;

    fn entry(date_ymd: (i32, u32, u32), open: &str, close: &str) -> CalendarEntry {
        CalendarEntry {
            date: NaiveDate::from_ymd_opt(date_ymd.0, date_ymd.1, date_ymd.2).unwrap(),
            open: Some(open.to_string()),
            close: Some(close.to_string()),
            session_open: None,
            session_close: None,
        }
    }

    #[test]
    fn plan_picks_previous_session_strictly_before_current() {
        let now = create_eastern_date(2024, 2, 16, 11, 0, 0, 0).unwrap();
        let calendar = vec![
            entry((2024, 2, 14), "09:30", "16:00"),
            entry((2024, 2, 15), "09:30", "16:00"),
            entry((2024, 2, 16), "09:30", "16:00"),
        ];
        let clock = ClockResponse {
            timestamp: now,
            is_open: true,
            next_open: now,
            next_close: now,
        };
        let plan = plan(now, &calendar, &clock).unwrap();
        assert_eq!(plan.current_window.session_date, NaiveDate::from_ymd_opt(2024, 2, 16).unwrap());
        assert_eq!(plan.previous_window.session_date, NaiveDate::from_ymd_opt(2024, 2, 15).unwrap());
        assert_eq!(plan.fetch_days.len(), 2);
    }

    #[test]
    fn plan_spans_a_weekend_gap_inclusive() {
        // Monday session with a previous Friday session three calendar days back.
        let now = create_eastern_date(2024, 2, 20, 11, 0, 0, 0).unwrap();
        let calendar = vec![
            entry((2024, 2, 16), "09:30", "16:00"),
            entry((2024, 2, 20), "09:30", "16:00"),
        ];
        let clock = ClockResponse {
            timestamp: now,
            is_open: true,
            next_open: now,
            next_close: now,
        };
        let plan = plan(now, &calendar, &clock).unwrap();
        assert_eq!(plan.fetch_days.len(), 5);
        assert_eq!(plan.fetch_days.first().copied(), Some(NaiveDate::from_ymd_opt(2024, 2, 16).unwrap()));
        assert_eq!(plan.fetch_days.last().copied(), Some(NaiveDate::from_ymd_opt(2024, 2, 20).unwrap()));
    }
}
