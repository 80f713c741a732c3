//! Timestamp utilities
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text
//! (`2024-05-01T12:00:00.000000Z`) so lexical order in SQL equals
//! chronological order.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp, truncated to the precision stored in the database
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    // Round-trip through the storage format so values compare equal after a reload
    parse_db(&format_db(&now)).unwrap_or(now)
}

/// Format a timestamp for storage in a TEXT column
pub fn format_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp read from a TEXT column
///
/// Accepts the storage format and SQLite's `CURRENT_TIMESTAMP` format
/// (`YYYY-MM-DD HH:MM:SS`, implicitly UTC).
pub fn parse_db(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Parse an optional timestamp column
pub fn parse_db_opt(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_db).transpose()
}

/// UTC calendar day of a timestamp
pub fn utc_day(ts: &DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_format_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::microseconds(1500);
        assert_eq!(format_db(&a), "2024-01-02T03:04:05.000000Z");
        assert_eq!(format_db(&a).len(), format_db(&b).len());
        assert!(format_db(&a) < format_db(&b));
    }

    #[test]
    fn test_parse_round_trip() {
        let ts = now();
        assert_eq!(parse_db(&format_db(&ts)).unwrap(), ts);
    }

    #[test]
    fn test_parse_sqlite_current_timestamp() {
        let ts = parse_db("2024-03-04 05:06:07").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_db("yesterday").is_err());
    }

    #[test]
    fn test_parse_optional() {
        assert!(parse_db_opt(None).unwrap().is_none());
        assert!(parse_db_opt(Some("2024-03-04 05:06:07".into())).unwrap().is_some());
    }
}
