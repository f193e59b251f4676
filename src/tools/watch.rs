//! Simple stopwatch for measuring how long a run or a single record took.

use std::time::Instant;

pub struct Watch {
    start: Instant,
}

impl Watch {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Returns the elapsed time in milliseconds, saturating at `u64::MAX`.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
