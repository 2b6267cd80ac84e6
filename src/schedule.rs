//! Time handling for De Lijn departures.
//!
//! The Open Data API reports local Brussels wall-clock timestamps without an
//! offset, so every instant in the crate is a `DateTime<Tz>` in
//! `Europe/Brussels`.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::{Europe::Brussels, Tz};

use crate::error::{Result, TrackerError};

/// A departure stays "upcoming" this long after its scheduled instant, so a
/// late bus keeps being tracked.
pub const DEPARTED_GRACE_MINUTES: i64 = 15;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

pub fn now_brussels() -> DateTime<Tz> {
    Utc::now().with_timezone(&Brussels)
}

/// Parses an API timestamp. Offsets (including `Z`) are honored; naive values
/// are Brussels local time.
pub fn parse_api_timestamp(value: &str) -> Result<DateTime<Tz>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Brussels));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .ok_or_else(|| TrackerError::InvalidTime {
            value: value.to_string(),
        })?;

    Brussels
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| TrackerError::InvalidTime {
            value: value.to_string(),
        })
}

/// `HH:MM` of a local instant.
pub fn format_hhmm(dt: &DateTime<Tz>) -> String {
    dt.format("%H:%M").to_string()
}

/// Extracts the `HH:MM` target time from either a plain `HH:MM` value or a
/// full API timestamp.
pub fn target_time_of(value: &str) -> Result<String> {
    if let Ok(t) = NaiveTime::parse_from_str(value.trim(), "%H:%M") {
        return Ok(t.format("%H:%M").to_string());
    }
    parse_api_timestamp(value).map(|dt| format_hhmm(&dt))
}

/// Parses a CLI `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| TrackerError::InvalidTime {
        value: value.to_string(),
    })
}

pub fn is_upcoming(scheduled_at: &DateTime<Tz>, now: &DateTime<Tz>) -> bool {
    *scheduled_at + Duration::minutes(DEPARTED_GRACE_MINUTES) >= *now
}

/// Whole minutes from `now` until `expected`, never negative.
pub fn waiting_minutes(now: &DateTime<Tz>, expected: &DateTime<Tz>) -> i64 {
    (*expected - *now).num_minutes().max(0)
}

/// Rounded difference in minutes; halves round away from zero.
pub fn delay_minutes(scheduled_at: &DateTime<Tz>, realtime_at: &DateTime<Tz>) -> i64 {
    let secs = (*realtime_at - *scheduled_at).num_seconds();
    (secs as f64 / 60.0).round() as i64
}

/// Formats a waiting time as `D.HH:MM`.
pub fn format_waiting_time(total_minutes: i64) -> String {
    let total_minutes = total_minutes.max(0);
    let days = total_minutes / (24 * 60);
    let remaining = total_minutes % (24 * 60);
    format!("{}.{:02}:{:02}", days, remaining / 60, remaining % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        Brussels.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_parse_naive_timestamp_is_brussels_local() {
        let dt = parse_api_timestamp("2024-03-11T08:15:00").unwrap();
        assert_eq!(dt, at(2024, 3, 11, 8, 15));
        assert_eq!(dt.with_timezone(&Utc).hour(), 7);
    }

    #[test]
    fn test_parse_zulu_timestamp() {
        let dt = parse_api_timestamp("2024-07-01T10:00:00Z").unwrap();
        // CEST is UTC+2
        assert_eq!(format_hhmm(&dt), "12:00");
    }

    #[test]
    fn test_parse_without_seconds() {
        let dt = parse_api_timestamp("2024-03-11T08:15").unwrap();
        assert_eq!(dt, at(2024, 3, 11, 8, 15));
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(matches!(
            parse_api_timestamp("tomorrow"),
            Err(TrackerError::InvalidTime { .. })
        ));
    }

    #[test]
    fn test_target_time_of() {
        assert_eq!(target_time_of("2024-03-11T08:15:00").unwrap(), "08:15");
        assert_eq!(target_time_of("8:05").unwrap(), "08:05");
        assert!(target_time_of("25:99").is_err());
    }

    #[test]
    fn test_is_upcoming_respects_grace() {
        let scheduled = at(2024, 3, 11, 8, 15);
        assert!(is_upcoming(&scheduled, &at(2024, 3, 11, 8, 0)));
        assert!(is_upcoming(&scheduled, &at(2024, 3, 11, 8, 30)));
        assert!(!is_upcoming(&scheduled, &at(2024, 3, 11, 8, 31)));
    }

    #[test]
    fn test_waiting_minutes_clamps_at_zero() {
        let now = at(2024, 3, 11, 8, 0);
        assert_eq!(waiting_minutes(&now, &at(2024, 3, 11, 8, 42)), 42);
        assert_eq!(waiting_minutes(&now, &at(2024, 3, 11, 7, 50)), 0);
    }

    #[test]
    fn test_delay_minutes_rounding() {
        let scheduled = at(2024, 3, 11, 8, 15);
        assert_eq!(delay_minutes(&scheduled, &(scheduled + Duration::seconds(150))), 3);
        assert_eq!(delay_minutes(&scheduled, &(scheduled + Duration::seconds(89))), 1);
        assert_eq!(delay_minutes(&scheduled, &(scheduled - Duration::seconds(150))), -3);
        assert_eq!(delay_minutes(&scheduled, &scheduled), 0);
    }

    #[test]
    fn test_format_waiting_time() {
        assert_eq!(format_waiting_time(0), "0.00:00");
        assert_eq!(format_waiting_time(75), "0.01:15");
        assert_eq!(format_waiting_time(24 * 60 + 5), "1.00:05");
        assert_eq!(format_waiting_time(-3), "0.00:00");
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2024-03-12").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 12).unwrap()
        );
        assert!(parse_date("12/03/2024").is_err());
    }
}
