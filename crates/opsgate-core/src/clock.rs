//! Wall-clock access in UTC.
//!
//! Use cases never call `Utc::now()` directly; they receive a [`Clock`] so
//! tests can pin time.

use chrono::{DateTime, SecondsFormat, Utc};

/// Source of the current UTC time.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Parse an RFC 3339 timestamp into a fixed clock.
    ///
    /// Returns `None` for unparseable input.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        parse_utc(raw).map(Self)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Parse an RFC 3339 timestamp (with `Z` or an offset) into UTC.
#[must_use]
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Render a timestamp as `2026-02-26T20:00:00Z`.
#[must_use]
pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Default run identifier derived from the run start, e.g. `20260226T200000Z`.
#[must_use]
pub fn run_stamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_accepts_zulu_and_offsets() {
        let zulu = parse_utc("2026-02-26T20:00:00Z").expect("zulu");
        let offset = parse_utc("2026-02-26T21:00:00+01:00").expect("offset");
        assert_eq!(zulu, offset);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_utc("").is_none());
        assert!(parse_utc("yesterday").is_none());
    }

    #[test]
    fn fixed_clock_is_frozen() {
        let clock = FixedClock::parse("2026-02-26T22:05:00Z").expect("clock");
        assert_eq!(clock.now(), clock.now());
        assert_eq!(format_utc(clock.now()), "2026-02-26T22:05:00Z");
    }

    #[test]
    fn run_stamp_is_compact_utc() {
        let ts = Utc.with_ymd_and_hms(2026, 2, 26, 20, 0, 0).single().expect("ts");
        assert_eq!(run_stamp(ts), "20260226T200000Z");
    }
}
