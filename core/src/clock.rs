//! Pipeline clock — wall time in production, settable time in tests.
//!
//! Every timestamp written by the core (last_refreshed, detected_at,
//! checked_at, job deadlines) flows through this clock so staleness and
//! trend behavior can be exercised without sleeping.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    fixed: Option<DateTime<Utc>>,
}

impl Clock {
    /// Wall-clock time. Used by the ops-runner binary.
    pub fn wall() -> Self {
        Self { fixed: None }
    }

    /// Pinned time. Used in tests; `now()` returns `at` until advanced.
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self { fixed: Some(at) }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.fixed.unwrap_or_else(Utc::now)
    }

    /// Move a fixed clock forward. No-op on a wall clock.
    pub fn advance(&mut self, by: Duration) {
        if let Some(at) = self.fixed {
            self.fixed = Some(at + by);
        }
    }

    pub fn set(&mut self, at: DateTime<Utc>) {
        self.fixed = Some(at);
    }
}
