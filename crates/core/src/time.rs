use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Wall-clock source for timestamps, fixed in tests.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    Default,
    Fixed(DateTime<Utc>),
}

impl Clock {
    /// Returns a clock that uses the current system time.
    #[must_use]
    pub fn default_clock() -> Self {
        Self::Default
    }

    /// Returns a clock fixed at the given timestamp.
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    /// Returns the current time according to the clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::Default => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }
}

//
// ─── ELAPSED TIME ──────────────────────────────────────────────────────────────
//

/// Elapsed working time of a lab session, in whole seconds.
///
/// Seeded with the time already recorded by the backend and counted on the
/// monotonic tokio clock from the moment the session started running, so
/// wall-clock adjustments never move a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElapsedTime {
    base_seconds: u64,
    since: Instant,
}

impl ElapsedTime {
    /// Start counting from `base_seconds` now.
    #[must_use]
    pub fn starting_now(base_seconds: u64) -> Self {
        Self {
            base_seconds,
            since: Instant::now(),
        }
    }

    #[must_use]
    pub fn base_seconds(&self) -> u64 {
        self.base_seconds
    }

    #[must_use]
    pub fn since(&self) -> Instant {
        self.since
    }

    /// Current reading, including the restored base.
    #[must_use]
    pub fn seconds(&self) -> u64 {
        self.seconds_at(Instant::now())
    }

    pub(crate) fn seconds_at(&self, now: Instant) -> u64 {
        let counted = now.saturating_duration_since(self.since).as_secs();
        self.base_seconds.saturating_add(counted)
    }
}

/// Deterministic timestamp for tests and examples (2023-11-14T22:13:20Z).
pub const FIXED_TEST_TIMESTAMP: i64 = 1_700_000_000;

/// Returns a deterministic `DateTime<Utc>` for tests and doc examples.
///
/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(FIXED_TEST_TIMESTAMP, 0)
        .expect("fixed timestamp should be valid")
}

/// Returns a `Clock` fixed at the deterministic test timestamp.
#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::fixed(fixed_now())
}
