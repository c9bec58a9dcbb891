//! Injectable time source.
//!
//! # Responsibility
//! - Supply the current instant and calendar day to scheduling code.
//! - Let tests pin time deterministically.
//!
//! # Invariants
//! - All instants are UTC; the calendar day is derived from the UTC instant.

use chrono::{DateTime, NaiveDate, Utc};

/// Time source consumed by review and session services.
pub trait Clock {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Current UTC calendar day.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock implementation for production callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
