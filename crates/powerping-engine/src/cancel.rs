use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Cooperative cancellation flag shared by every engine of a run.
///
/// Clones observe the same flag. `sleep` wakes as soon as the token fires,
/// so interval waits never delay cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.inner.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `duration` or until cancelled. Returns true if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if duration.is_zero() {
            return *guard;
        }
        let (guard, _) = self
            .inner
            .signal
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}
