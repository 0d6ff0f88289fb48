// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Timestamps as stored in Firestore and returned by the API.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC3339 timestamp with any offset into UTC.
pub fn parse_utc_rfc3339(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_normalised_to_utc() {
        let parsed = parse_utc_rfc3339("2026-03-01T09:30:00-08:00").unwrap();
        assert_eq!(format_utc_rfc3339(parsed), "2026-03-01T17:30:00Z");
    }

    #[test]
    fn test_sub_second_precision_dropped() {
        let parsed = parse_utc_rfc3339("2026-03-01T17:30:00.987Z").unwrap();
        assert_eq!(format_utc_rfc3339(parsed), "2026-03-01T17:30:00Z");
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_utc_rfc3339("yesterday").is_err());
    }
}
