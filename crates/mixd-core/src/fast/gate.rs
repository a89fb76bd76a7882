//! Cold-idle gate
//!
//! A futex-style counter the fast path parks on while cold idle. The fast
//! path decrements and parks only if the count went negative; the control
//! loop increments and unparks only if it found a parked waiter. Neither
//! side takes a lock, so the real-time thread never waits on a mutex held
//! by a lower-priority thread.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::OnceLock;
use std::thread::{self, Thread};

#[derive(Debug, Default)]
pub struct ColdIdleGate {
    futex: AtomicI32,
    waiter: OnceLock<Thread>,
}

impl ColdIdleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park the calling thread until `wake` (returns at once if a wake is
    /// already pending)
    pub fn wait(&self) {
        let _ = self.waiter.get_or_init(thread::current);
        if self.futex.fetch_sub(1, Ordering::AcqRel) > 0 {
            return;
        }
        while self.futex.load(Ordering::Acquire) < 0 {
            thread::park();
        }
    }

    /// Release a parked waiter, or let the next `wait` pass through
    pub fn wake(&self) {
        if self.futex.fetch_add(1, Ordering::AcqRel) < 0 {
            if let Some(waiter) = self.waiter.get() {
                waiter.unpark();
            }
        }
    }

    /// True while a waiter is parked
    pub fn is_parked(&self) -> bool {
        self.futex.load(Ordering::Acquire) < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_pending_wake_lets_wait_through() {
        let gate = ColdIdleGate::new();
        gate.wake();
        gate.wait();
        assert!(!gate.is_parked());
    }

    #[test]
    fn test_wake_releases_parked_thread() {
        let gate = Arc::new(ColdIdleGate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait())
        };

        while !gate.is_parked() {
            thread::sleep(Duration::from_millis(1));
        }
        gate.wake();
        waiter.join().unwrap();
        assert!(!gate.is_parked());
    }
}
