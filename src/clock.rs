//! Wall clock used to stamp station commands with an absolute execution time.

use time::{OffsetDateTime, UtcOffset};

/// Clock with a UTC offset fixed at start-up.
///
/// Stations compare the `at` field of each command against their own local
/// clock, so timestamps are produced in the game-master's local offset. The
/// offset can only be queried reliably while the process is single-threaded,
/// which is why it is captured once and then copied around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    offset: UtcOffset,
}

impl Clock {
    /// Capture the local UTC offset, falling back to UTC when it cannot be determined.
    ///
    /// Call this before the async runtime spawns its worker threads.
    pub fn local() -> Self {
        Self {
            offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        }
    }

    /// Clock reporting plain UTC.
    pub fn utc() -> Self {
        Self {
            offset: UtcOffset::UTC,
        }
    }

    /// Current wall-clock time in the captured offset.
    pub fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::utc()
    }
}
