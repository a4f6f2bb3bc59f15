//! Civil calendar helpers pinned to the agent's operating zone (UTC+8).

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, TimeZone, Utc};

/// Offset of the operating zone east of UTC, in seconds.
pub const ZONE_OFFSET_SECS: i32 = 8 * 3600;

/// Layout used for human-readable timestamps in alerts and logs.
pub const TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// Layout of the date component in daemon log paths.
pub const DATE_LAYOUT: &str = "%Y-%m-%d";

const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
const DAYS_IN_MONTH_LEAP: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// The fixed UTC+8 offset all cron evaluation happens in.
pub fn zone() -> FixedOffset {
    FixedOffset::east_opt(ZONE_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Current instant in the operating zone.
pub fn now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&zone())
}

/// Current Unix time in whole seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Format a Unix timestamp with [`TIME_LAYOUT`] in the operating zone.
pub fn format_unix(ts: i64) -> String {
    match zone().timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format(TIME_LAYOUT).to_string(),
        None => String::new(),
    }
}

/// Date component used to partition daemon logs, e.g. `2024-03-01`.
pub fn log_date<Tz: TimeZone>(at: &DateTime<Tz>) -> String {
    at.with_timezone(&zone()).format(DATE_LAYOUT).to_string()
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Number of days in `month` (1-12) of `year`.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let idx = (month.clamp(1, 12) - 1) as usize;
    if is_leap_year(year) {
        DAYS_IN_MONTH_LEAP[idx]
    } else {
        DAYS_IN_MONTH[idx]
    }
}

/// Weekday of a civil date, 0 = Sunday .. 6 = Saturday.
pub fn weekday(year: i32, month: u32, day: u32) -> Option<u32> {
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.weekday().num_days_from_sunday())
}

/// Weekday closest to `day` that stays inside the month.
///
/// Candidates are tried in the order `day, day+1, day-1, day-2, day+2`, which
/// maps a Saturday to the preceding Friday and a Sunday to the following
/// Monday unless that would leave the month. `day` is clamped to the month
/// length first.
pub fn nearest_weekday(year: i32, month: u32, day: u32) -> u32 {
    let dim = days_in_month(year, month) as i32;
    let target = (day as i32).clamp(1, dim);
    for offset in [0, 1, -1, -2, 2] {
        let candidate = target + offset;
        if candidate < 1 || candidate > dim {
            continue;
        }
        match weekday(year, month, candidate as u32) {
            Some(0) | Some(6) | None => continue,
            Some(_) => return candidate as u32,
        }
    }
    target as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leap_years() {
        assert!(is_leap_year(2024));
        assert!(is_leap_year(2000));
        assert!(!is_leap_year(1900));
        assert!(!is_leap_year(2023));
    }

    #[test]
    fn february_length_follows_leap_rule() {
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2024, 4), 30);
        assert_eq!(days_in_month(2024, 12), 31);
    }

    #[test]
    fn weekday_is_sunday_based() {
        // 2024-01-01 was a Monday, 2024-01-07 a Sunday.
        assert_eq!(weekday(2024, 1, 1), Some(1));
        assert_eq!(weekday(2024, 1, 7), Some(0));
        assert_eq!(weekday(2024, 2, 30), None);
    }

    #[test]
    fn nearest_weekday_moves_saturday_back() {
        // 2024-06-15 is a Saturday.
        assert_eq!(nearest_weekday(2024, 6, 15), 14);
    }

    #[test]
    fn nearest_weekday_stays_inside_month() {
        // 2024-06-01 is a Saturday; Friday would be in May.
        assert_eq!(nearest_weekday(2024, 6, 1), 3);
        // 2024-08-31 is a Saturday.
        assert_eq!(nearest_weekday(2024, 8, 31), 30);
    }

    #[test]
    fn nearest_weekday_clamps_past_month_end() {
        // 2024-02-29 is a Thursday.
        assert_eq!(nearest_weekday(2024, 2, 31), 29);
    }

    #[test]
    fn log_date_uses_operating_zone() {
        let utc = Utc.with_ymd_and_hms(2024, 3, 1, 17, 0, 0).unwrap();
        assert_eq!(log_date(&utc), "2024-03-02");
    }

    #[test]
    fn format_unix_renders_local_time() {
        assert_eq!(format_unix(0), "1970-01-01 08:00:00");
    }
}
