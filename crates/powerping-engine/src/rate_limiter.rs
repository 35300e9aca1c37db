use crate::clock::{Clock, MonotonicClock};
use std::time::{Duration, Instant};

/// Lets an expensive action through at most once per `min_interval`.
///
/// Used to decouple probing rate from rendering: the producer may update
/// thousands of times a second while the display refreshes a few times.
#[derive(Debug)]
pub struct RateLimiter<C = MonotonicClock> {
    clock: C,
    min_interval: Duration,
    last_run: Option<Instant>,
}

impl RateLimiter<MonotonicClock> {
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, MonotonicClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(min_interval: Duration, clock: C) -> Self {
        Self {
            clock,
            min_interval,
            last_run: None,
        }
    }

    pub fn request_run(&mut self) -> bool {
        let now = self.clock.now();
        match self.last_run {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_run = Some(now);
                true
            }
        }
    }
}
