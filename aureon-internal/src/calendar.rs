//! UTC calendar boundaries used for budget and quota accounting.

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};

/// Midnight UTC on the first day of the month containing `now`.
pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Midnight UTC on the day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now)
}

/// Number of days in the month containing `now`.
pub fn days_in_month(now: DateTime<Utc>) -> u32 {
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1);
    let next = first.and_then(|first| first.checked_add_months(Months::new(1)));
    match (first, next) {
        (Some(first), Some(next)) => (next - first).num_days() as u32,
        // Only reachable at the edges of chrono's representable range
        _ => 30,
    }
}

/// 1-based day of the month, so the first day counts as one elapsed day.
pub fn days_elapsed_in_month(now: DateTime<Utc>) -> u32 {
    now.day()
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
