//! Frozen time for tests.

use chrono::{DateTime, TimeZone, Utc};
use taleweaver_core::clock::Clock;

/// Returns the same instant on every call. Decision expiry and event
/// timestamps computed against it are exact.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// 2026-01-15 10:00:00 UTC, the instant shared by the integration tests.
    ///
    /// # Panics
    ///
    /// Only if the hard-coded date were invalid.
    #[must_use]
    pub fn reference() -> Self {
        Self(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
