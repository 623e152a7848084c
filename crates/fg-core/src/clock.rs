//! Wall-clock abstraction, injectable so retry-timing tests are not flaky.

use chrono::{DateTime, Utc};

/// A source of the current wall-clock time.
///
/// Production code uses [`SystemClock`]; tests inject a fixed or
/// manually-advanced clock so that timestamp-dependent assertions (e.g. the
/// backoff-bound property) don't depend on real elapsed time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The real, OS-backed clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
