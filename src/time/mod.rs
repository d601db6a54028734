//! Eastern-time civil date arithmetic (spec §4.1).
//!
//! All date-key derivation in the rest of the crate goes through this module -
//! never a naive UTC midnight (spec §9, "Time zones").

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::US::Eastern;

/// Civil date/time parts of an instant, read in America/New_York.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EasternParts {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub ms: u32,
}

pub fn eastern_parts(instant: DateTime<Utc>) -> EasternParts {
    let et = instant.with_timezone(&Eastern);
    EasternParts {
        year: et.year(),
        month: et.month(),
        day: et.day(),
        hour: et.hour(),
        minute: et.minute(),
        second: et.second(),
        ms: et.timestamp_subsec_millis(),
    }
}

/// The Eastern civil day containing `instant`, as a plain date.
pub fn eastern_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&Eastern).date_naive()
}

/// First instant of the Eastern civil day containing `instant`.
pub fn start_of_eastern_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    let date = eastern_date(instant);
    create_eastern_date(date.year(), date.month(), date.day(), 0, 0, 0, 0)
        .expect("midnight is always a valid Eastern instant")
}

/// Last instant (23:59:59.999) of the Eastern civil day containing `instant`.
pub fn end_of_eastern_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    let date = eastern_date(instant);
    create_eastern_date(date.year(), date.month(), date.day(), 23, 59, 59, 999)
        .expect("23:59:59.999 is always a valid Eastern instant")
}

/// Builds an instant from Eastern civil parts.
///
/// DST resolution policy (documented, not silently reinterpreted, per spec §9):
/// - Ambiguous wall-clock readings (fall-back, occur twice) resolve to the
///   *earlier* of the two valid instants.
/// - Skipped wall-clock readings (spring-forward, never occur) resolve to the
///   first valid instant at or after the requested time.
pub fn create_eastern_date(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    ms: u32,
) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let naive = date.and_hms_milli_opt(hour, minute, second, ms)?;
    Some(resolve_eastern_naive(naive).with_timezone(&Utc))
}

fn resolve_eastern_naive(naive: NaiveDateTime) -> DateTime<chrono_tz::Tz> {
    match Eastern.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(earlier, _later) => earlier,
        chrono::LocalResult::None => {
            // Spring-forward gap: walk forward in small steps until a valid
            // local reading appears (at most a couple of hours for US DST).
            let mut probe = naive;
            loop {
                probe += chrono::Duration::minutes(1);
                if let chrono::LocalResult::Single(dt) = Eastern.from_local_datetime(&probe) {
                    return dt;
                }
            }
        }
    }
}

/// `ensure_date` per spec §4.1: raises (here, returns an error) on invalid civil parts.
pub fn ensure_date(year: i32, month: u32, day: u32) -> anyhow::Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| anyhow::anyhow!("invalid civil date {year:04}-{month:02}-{day:02}"))
}

/// `YYYY-MM-DD` in Eastern time.
pub fn format_date_key(instant: DateTime<Utc>) -> String {
    eastern_date(instant).format("%Y-%m-%d").to_string()
}

/// `YYYYMMDD` in Eastern time.
pub fn format_date_key_compact(instant: DateTime<Utc>) -> String {
    eastern_date(instant).format("%Y%m%d").to_string()
}

/// Accepts `YYYY-MM-DD` (midnight Eastern) or ISO-8601 with offset. Ill-formed
/// inputs return `None` rather than raising (spec §4.1 failure mode).
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return create_eastern_date(date.year(), date.month(), date.day(), 0, 0, 0, 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    None
}

/// Shifts by `n` civil days, preserving Eastern wall time.
pub fn add_eastern_days(instant: DateTime<Utc>, n: i64) -> DateTime<Utc> {
    let et = instant.with_timezone(&Eastern);
    let shifted_naive = et.naive_local() + chrono::Duration::days(n);
    resolve_eastern_naive(shifted_naive).with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_date_key_round_trips_for_ordinary_days() {
        let instant = create_eastern_date(2024, 2, 16, 9, 30, 0, 0).unwrap();
        assert_eq!(format_date_key(instant), "2024-02-16");
        assert_eq!(format_date_key_compact(instant), "20240216");
    }

    #[test]
    fn format_date_key_round_trips_across_spring_forward() {
        // 2024-03-10 02:30 ET does not exist (clocks jump 02:00 -> 03:00).
        let instant = create_eastern_date(2024, 3, 10, 2, 30, 0, 0).unwrap();
        assert_eq!(format_date_key(instant), "2024-03-10");
    }

    #[test]
    fn format_date_key_round_trips_across_fall_back() {
        // 2024-11-03 01:30 ET occurs twice; policy picks the earlier occurrence.
        let instant = create_eastern_date(2024, 11, 3, 1, 30, 0, 0).unwrap();
        assert_eq!(format_date_key(instant), "2024-11-03");
    }

    #[test]
    fn parse_date_accepts_plain_date_and_rfc3339() {
        assert!(parse_date("2024-02-16").is_some());
        assert!(parse_date("2024-02-16T14:30:00Z").is_some());
        assert!(parse_date("not-a-date").is_none());
    }

    #[test]
    fn add_eastern_days_preserves_wall_clock_hour() {
        let instant = create_eastern_date(2024, 2, 16, 9, 30, 0, 0).unwrap();
        let shifted = add_eastern_days(instant, 3);
        let parts = eastern_parts(shifted);
        assert_eq!(parts.day, 19);
        assert_eq!(parts.hour, 9);
        assert_eq!(parts.minute, 30);
    }

    #[test]
    fn start_and_end_of_day_bracket_the_civil_day() {
        let instant = create_eastern_date(2024, 2, 16, 14, 30, 0, 0).unwrap();
        let start = start_of_eastern_day(instant);
        let end = end_of_eastern_day(instant);
        assert_eq!(eastern_date(start), eastern_date(instant));
        assert_eq!(eastern_date(end), eastern_date(instant));
        assert!(start < instant && instant < end);
    }
}
