//! Provider timestamp formats, all rendered in WIB.

use chrono::{DateTime, Utc};

use checkout_types::domain::clock::to_wib;

/// `yyyy-MM-ddTHH:mm:ss.SSS+07:00`
pub fn snap_timestamp(at: DateTime<Utc>) -> String {
    to_wib(at).format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string()
}

/// `yyyy-MM-ddTHH:mm:ss+07:00`
pub fn iso_wib(at: DateTime<Utc>) -> String {
    to_wib(at).format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// `yyyy-MM-dd HH:mm:ss +0700`
pub fn midtrans_wib(at: DateTime<Utc>) -> String {
    to_wib(at).format("%Y-%m-%d %H:%M:%S %z").to_string()
}

/// `yyyy-MM-dd HH:mm:ss` in WIB with no offset, as several providers return.
pub fn parse_wib_naive(value: &str) -> Option<DateTime<Utc>> {
    let naive = chrono::NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S").ok()?;
    naive
        .and_local_timezone(checkout_types::domain::clock::wib())
        .single()
        .map(|d| d.with_timezone(&Utc))
}

/// RFC 3339 with any offset.
pub fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Nanosecond clock reading used for provider external ids.
pub fn nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or_else(|| at.timestamp_micros() * 1_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 3, 4, 5).unwrap() + chrono::Duration::milliseconds(67)
    }

    #[test]
    fn test_formats() {
        assert_eq!(snap_timestamp(at()), "2025-03-01T10:04:05.067+07:00");
        assert_eq!(iso_wib(at()), "2025-03-01T10:04:05+07:00");
        assert_eq!(midtrans_wib(at()), "2025-03-01 10:04:05 +0700");
    }

    #[test]
    fn test_parse_wib_naive() {
        let parsed = parse_wib_naive("2025-03-01 10:04:05").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 3, 1, 3, 4, 5).unwrap());
        assert!(parse_wib_naive("garbage").is_none());
    }
}
