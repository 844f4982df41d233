//! Western Indonesia Time (UTC+7), the business timezone for dates, weekdays
//! and provider timestamps.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc, Weekday};

const WIB_OFFSET_SECS: i32 = 7 * 3600;

pub fn wib() -> FixedOffset {
    FixedOffset::east_opt(WIB_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

pub fn to_wib(at: DateTime<Utc>) -> DateTime<FixedOffset> {
    at.with_timezone(&wib())
}

pub fn weekday_wib(at: DateTime<Utc>) -> Weekday {
    to_wib(at).weekday()
}

/// Start and end (exclusive) of the WIB calendar day containing `at`, in UTC.
pub fn wib_day_bounds(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let local = to_wib(at).date_naive().and_time(NaiveTime::MIN);
    let start = wib()
        .from_local_datetime(&local)
        .single()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(at);
    (start, start + Duration::days(1))
}
