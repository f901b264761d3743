use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::Ms;

/// Source of "now" for the service layer. The booking rules never read a
/// clock themselves; callers sample one of these and pass the value in.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Ms)
            .unwrap_or(0)
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: Ms,
}

impl FixedClock {
    pub const fn new(now: Ms) -> Self {
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> Ms {
        self.now
    }
}
