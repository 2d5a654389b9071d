//! AMZ-format date source
//!
//! SigV4 needs the same instant in two renderings (full timestamp and
//! day stamp) plus a numeric day for the signing-key cache. Capturing
//! all three at once keeps a request from straddling midnight with a
//! mismatched scope.

use chrono::{DateTime, Utc};

/// One captured instant, pre-rendered for signing.
#[derive(Debug, Clone)]
pub struct AmzDate {
    /// `YYYYMMDDTHHMMSSZ` (UTC, zero-padded)
    pub date_time: String,
    /// `yyyymmdd` day stamp used in the credential scope
    pub date: String,
    /// Unix seconds floored to the UTC day boundary, in days
    pub numeric_day: i64,
}

impl AmzDate {
    /// Capture the current instant.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Build from a unix timestamp (seconds). Used by tests to freeze
    /// the signing date.
    pub fn from_unix(secs: i64) -> Self {
        let dt = DateTime::<Utc>::from_timestamp(secs, 0)
            .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap());
        Self::from_datetime(dt)
    }

    fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            date_time: dt.format("%Y%m%dT%H%M%SZ").to_string(),
            date: dt.format("%Y%m%d").to_string(),
            numeric_day: dt.timestamp().div_euclid(86400),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_date_rendering() {
        // 2013-05-24T00:00:00Z, the SigV4 reference example instant
        let date = AmzDate::from_unix(1369353600);
        assert_eq!(date.date_time, "20130524T000000Z");
        assert_eq!(date.date, "20130524");
        assert_eq!(date.numeric_day, 1369353600 / 86400);
    }

    #[test]
    fn test_zero_padding() {
        // 2026-01-05T03:07:09Z
        let date = AmzDate::from_unix(1767582429);
        assert_eq!(date.date_time, "20260105T030709Z");
        assert_eq!(date.date, "20260105");
    }

    #[test]
    fn test_day_boundary() {
        let before = AmzDate::from_unix(86399);
        let after = AmzDate::from_unix(86400);
        assert_eq!(before.numeric_day + 1, after.numeric_day);
    }
}
