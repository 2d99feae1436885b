use chrono::{DateTime, FixedOffset, Local, Utc};
use thiserror::Error;

/// Wire pattern for envelope timestamps: `2011-10-27T17:21:17+0000`.
///
/// The offset is always numeric, so the text for a given instant and zone is
/// reproducible without a time-zone database.
pub const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid timestamp '{value}': {message}")]
pub struct TimestampError {
    pub value: String,
    pub message: String,
}

/// A point in time together with the zone offset it was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<FixedOffset>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Local::now().fixed_offset())
    }

    /// Parses the wire pattern, falling back to RFC 3339 (`Z` or `+00:00`
    /// offsets) for peers that emit the extended form.
    pub fn parse(value: &str) -> Result<Self, TimestampError> {
        DateTime::parse_from_str(value, WIRE_FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(value))
            .map(Self)
            .map_err(|e| TimestampError {
                value: value.to_string(),
                message: e.to_string(),
            })
    }

    pub fn to_wire(&self) -> String {
        self.0.format(WIRE_FORMAT).to_string()
    }

    pub fn into_inner(self) -> DateTime<FixedOffset> {
        self.0
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl From<DateTime<FixedOffset>> for Timestamp {
    fn from(time: DateTime<FixedOffset>) -> Self {
        Self(time)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Self(time.fixed_offset())
    }
}

impl From<Timestamp> for DateTime<FixedOffset> {
    fn from(timestamp: Timestamp) -> Self {
        timestamp.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

impl std::ops::Deref for Timestamp {
    type Target = DateTime<FixedOffset>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn fixed(offset_secs: i32) -> Timestamp {
        let offset = FixedOffset::east_opt(offset_secs).unwrap();
        Timestamp::from(offset.with_ymd_and_hms(2011, 10, 27, 17, 21, 17).unwrap())
    }

    #[test]
    fn test_timestamp_now() {
        let timestamp = Timestamp::now();
        let elapsed = Local::now().fixed_offset() - *timestamp;
        assert!(elapsed.num_seconds() < 1);
    }

    #[test]
    fn test_to_wire_utc() {
        assert_eq!(fixed(0).to_wire(), "2011-10-27T17:21:17+0000");
    }

    #[test]
    fn test_to_wire_keeps_offset() {
        assert_eq!(fixed(-4 * 3600).to_wire(), "2011-10-27T17:21:17-0400");
        assert_eq!(fixed(5 * 3600 + 1800).to_wire(), "2011-10-27T17:21:17+0530");
    }

    #[test]
    fn test_parse_wire_roundtrip() {
        let original = fixed(-4 * 3600);
        let parsed = Timestamp::parse(&original.to_wire()).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.to_wire(), original.to_wire());
    }

    #[test]
    fn test_parse_rfc3339_fallback() {
        let parsed = Timestamp::parse("2011-10-27T17:21:17Z").unwrap();
        assert_eq!(parsed, fixed(0));
    }

    #[test]
    fn test_parse_invalid() {
        let err = Timestamp::parse("yesterday").unwrap_err();
        assert_eq!(err.value, "yesterday");
    }

    #[test]
    fn test_display_matches_wire() {
        let timestamp = fixed(3600);
        assert_eq!(format!("{}", timestamp), timestamp.to_wire());
    }
}
