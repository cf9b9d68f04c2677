use std::thread;
use std::time::Duration;

use time::OffsetDateTime;

/// Wall clock and blocking sleep used by the retry loop.
pub trait Clock {
    fn now(&self) -> OffsetDateTime;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}
