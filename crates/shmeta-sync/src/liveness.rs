use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Open/closed flag that sleeping waiters can be woken from.
#[derive(Debug)]
pub struct Liveness {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(true),
            changed: Condvar::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock().expect("lock poisoned")
    }

    /// Mark closed and wake every sleeper. Returns `true` for the call that
    /// performed the transition.
    pub fn close(&self) -> bool {
        let mut open = self.open.lock().expect("lock poisoned");
        let was_open = *open;
        *open = false;
        self.changed.notify_all();
        was_open
    }

    /// Sleep for `duration` unless closed first. Returns whether still open.
    pub fn sleep(&self, duration: Duration) -> bool {
        let open = self.open.lock().expect("lock poisoned");
        let (open, _) = self
            .changed
            .wait_timeout_while(open, duration, |open| *open)
            .expect("lock poisoned");
        *open
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}
