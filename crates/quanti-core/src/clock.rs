//! UTC timestamp formatting for run names and summary documents.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time since the Unix epoch, zero if the system clock is set before it.
pub fn since_epoch(t: SystemTime) -> Duration {
    t.duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// Compact UTC tag used in run names, e.g. `20260215T013000Z`.
pub fn now_tag() -> String {
    format_tag(since_epoch(SystemTime::now()))
}

/// Format a duration-since-epoch as a compact tag (`YYYYMMDDTHHMMSSZ`).
pub fn format_tag(since_epoch: Duration) -> String {
    let t = UtcTime::from_epoch_secs(since_epoch.as_secs());
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        t.year, t.month, t.day, t.hour, t.minute, t.second
    )
}

/// Format a duration-since-epoch as a full ISO-8601 timestamp.
/// Example: `2026-02-15T01:30:00Z`
pub fn format_iso8601(since_epoch: Duration) -> String {
    let t = UtcTime::from_epoch_secs(since_epoch.as_secs());
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        t.year, t.month, t.day, t.hour, t.minute, t.second
    )
}

/// Broken-down UTC time. Leap seconds are not represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UtcTime {
    year: u64,
    month: u64,
    day: u64,
    hour: u64,
    minute: u64,
    second: u64,
}

impl UtcTime {
    fn from_epoch_secs(secs: u64) -> Self {
        let (year, month, day) = civil_from_days(secs / 86_400);
        let rem = secs % 86_400;
        Self {
            year,
            month,
            day,
            hour: rem / 3_600,
            minute: rem % 3_600 / 60,
            second: rem % 60,
        }
    }
}

/// Proleptic Gregorian date of `days` after 1970-01-01.
///
/// Counts in 400-year eras of 146 097 days starting on March 1st, so the
/// leap day falls at the end of each computed year.
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    const DAYS_PER_ERA: u64 = 146_097;
    // 0000-03-01 to 1970-01-01.
    const EPOCH_SHIFT: u64 = 719_468;

    let z = days + EPOCH_SHIFT;
    let era = z / DAYS_PER_ERA;
    let day_of_era = z % DAYS_PER_ERA;
    let year_of_era =
        (day_of_era - day_of_era / 1_460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let month_from_march = (5 * day_of_year + 2) / 153;

    let day = day_of_year - (153 * month_from_march + 2) / 5 + 1;
    let month = if month_from_march < 10 {
        month_from_march + 3
    } else {
        month_from_march - 9
    };
    let year = era * 400 + year_of_era + u64::from(month <= 2);
    (year, month, day)
}
