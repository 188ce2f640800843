//! Clock abstraction for determinism.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Abstraction over system time for deterministic behavior.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Returns how long remains until `deadline`, or `None` if it has passed.
    fn until(&self, deadline: DateTime<Utc>) -> Option<Duration> {
        (deadline - self.now())
            .to_std()
            .ok()
            .filter(|remaining| !remaining.is_zero())
    }
}

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
