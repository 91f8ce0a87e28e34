//! UTC timestamp helpers.
//!
//! Every timestamp persisted by the store uses the fixed-width form
//! `YYYY-MM-DDTHH:MM:SSZ`, so SQL string comparison matches chronological
//! order.

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::error::{CurationError, Result};

const STORAGE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub fn format_ts(value: OffsetDateTime) -> Result<String> {
    value
        .to_offset(UtcOffset::UTC)
        .format(STORAGE_FORMAT)
        .map_err(|err| CurationError::Time(err.to_string()))
}

/// Parse a stored timestamp, also accepting RFC 3339 input from feeds.
pub fn parse_ts(value: &str) -> Result<OffsetDateTime> {
    if let Ok(parsed) = PrimitiveDateTime::parse(value, STORAGE_FORMAT) {
        return Ok(parsed.assume_utc());
    }
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| CurationError::Time(format!("{value}: {err}")))
}

pub fn hours_ago(now: OffsetDateTime, hours: f64) -> OffsetDateTime {
    now - Duration::seconds_f64(hours * 3600.0)
}

pub fn days_ago(now: OffsetDateTime, days: f64) -> OffsetDateTime {
    now - Duration::seconds_f64(days * 86400.0)
}

pub fn age_hours(then: OffsetDateTime, now: OffsetDateTime) -> f64 {
    (now - then).as_seconds_f64() / 3600.0
}

pub fn age_days(then: OffsetDateTime, now: OffsetDateTime) -> f64 {
    (now - then).as_seconds_f64() / 86400.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn storage_format_round_trips_and_sorts() {
        let early = datetime!(2026-01-02 03:04:05 UTC);
        let late = datetime!(2026-01-10 00:00:00 UTC);
        let early_s = format_ts(early).unwrap();
        assert_eq!(early_s, "2026-01-02T03:04:05Z");
        assert_eq!(parse_ts(&early_s).unwrap(), early);
        assert!(early_s < format_ts(late).unwrap());
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let parsed = parse_ts("2026-01-02T12:00:00+09:00").unwrap();
        assert_eq!(parsed, datetime!(2026-01-02 03:00:00 UTC));
    }
}
