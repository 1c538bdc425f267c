//! Timestamp parsing and formatting.
//!
//! All timestamps in the store are whole Unix seconds (UTC). Text form is
//! always `YYYY-MM-DDTHH:MM:SSZ`.

use chrono::{DateTime, NaiveDateTime};

use crate::error::TimestampError;

/// Parse an ISO-8601 `YYYY-MM-DDTHH:MM:SSZ` string into epoch seconds.
///
/// Strings shorter than 20 characters or with non-numeric fields are
/// rejected.
pub fn parse_timestamp(s: &str) -> Result<i64, TimestampError> {
    if s.len() < 20 {
        return Err(TimestampError::InvalidString(s.to_string()));
    }
    let dt = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")
        .map_err(|_| TimestampError::InvalidString(s.to_string()))?;
    Ok(dt.and_utc().timestamp())
}

/// Format epoch seconds as `YYYY-MM-DDTHH:MM:SSZ`.
///
/// Negative seconds are rejected.
pub fn format_timestamp(secs: i64) -> Result<String, TimestampError> {
    if secs < 0 {
        return Err(TimestampError::NegativeSeconds(secs));
    }
    let dt = DateTime::from_timestamp(secs, 0).ok_or(TimestampError::NegativeSeconds(secs))?;
    Ok(dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

/// Current wall-clock time as whole Unix seconds.
#[must_use]
pub fn system_time_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_epoch() {
        assert_eq!(parse_timestamp("1970-01-01T00:00:00Z").unwrap(), 0);
    }

    #[test]
    fn parse_known_instant() {
        assert_eq!(parse_timestamp("2024-01-15T12:30:45Z").unwrap(), 1_705_321_845);
    }

    #[test]
    fn roundtrip() {
        for secs in [0i64, 1, 59, 86_400, 1_705_321_845, 4_102_444_799] {
            let text = format_timestamp(secs).unwrap();
            assert_eq!(parse_timestamp(&text).unwrap(), secs, "roundtrip for {secs}");
        }
    }

    #[test]
    fn short_string_rejected() {
        assert!(parse_timestamp("2024-01-15").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn garbage_fields_rejected() {
        assert!(parse_timestamp("2024-XX-15T12:30:45Z").is_err());
        assert!(parse_timestamp("not-a-timestamp-at!!").is_err());
    }

    #[test]
    fn negative_seconds_rejected() {
        assert!(matches!(
            format_timestamp(-1),
            Err(TimestampError::NegativeSeconds(-1))
        ));
    }

    #[test]
    fn system_time_is_sane() {
        // After 2020-01-01, before 2100-01-01.
        let now = system_time_seconds();
        assert!(now > 1_577_836_800);
        assert!(now < 4_102_444_800);
    }
}
