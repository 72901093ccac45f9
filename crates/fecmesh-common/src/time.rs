//! Timestamp handling.
//!
//! Timestamps are ISO-8601 UTC strings at the boundary (manifests, the
//! wire protocol) and a sortable representation internally, per §4.3:
//! `Timestamp` wraps `time::OffsetDateTime`, whose natural `Ord` is by
//! instant, and serializes as RFC 3339 so on-disk/on-wire JSON stays
//! human-readable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl Timestamp {
    /// Current UTC instant.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    #[must_use]
    pub const fn from_offset_date_time(dt: OffsetDateTime) -> Self {
        Self(dt)
    }

    #[must_use]
    pub const fn as_offset_date_time(&self) -> OffsetDateTime {
        self.0
    }

    #[must_use]
    pub fn checked_add(&self, duration: Duration) -> Option<Self> {
        self.0
            .checked_add(time::Duration::try_from(duration).ok()?)
            .map(Self)
    }

    /// Whether this instant lies strictly before `now`.
    #[must_use]
    pub fn is_past(&self) -> bool {
        self.0 < OffsetDateTime::now_utc()
    }

    /// Render as an RFC 3339 / ISO-8601 string.
    #[must_use]
    pub fn to_iso8601(&self) -> String {
        self.0
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default()
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_iso8601())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_iso8601())
    }
}

/// Current time; kept as a free function so call sites read the same
/// way a plain `SystemTime::now()` call site would.
#[must_use]
pub fn now() -> Timestamp {
    Timestamp::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_instant_order() {
        let earlier = Timestamp::now();
        std::thread::sleep(Duration::from_millis(2));
        let later = Timestamp::now();
        assert!(earlier < later);
    }

    #[test]
    fn round_trips_through_iso8601() {
        let ts = Timestamp::now();
        let rendered = ts.to_iso8601();
        assert!(rendered.contains('T'));
        assert!(rendered.ends_with('Z') || rendered.contains('+'));
    }

    #[test]
    fn checked_add_extends_expiry() {
        let ts = Timestamp::now();
        let later = ts.checked_add(Duration::from_secs(3600)).unwrap();
        assert!(later > ts);
    }
}
