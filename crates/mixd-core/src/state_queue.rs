//! Lock-free double-buffered state queue
//!
//! Carries immutable configuration snapshots from the control loop (the
//! single mutator) to the fast path (the single observer). The mutator
//! edits a private draft and publishes it into one of two slots; the
//! observer copies the newest published slot once per cycle.
//!
//! The mutator only writes the slot the observer cannot be reading: a
//! push is allowed while the observer has acknowledged at least the
//! generation before the current one. The observer never waits; it either
//! sees a new complete snapshot or keeps the one it has.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::utils::Backoff;

/// How long `push` waits before giving up its time slice between checks
const WAIT_SLEEP: Duration = Duration::from_micros(200);

/// How `push` treats a busy queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    /// Publish if a slot is free, otherwise keep the draft for later
    Never,
    /// Wait until the draft has been published
    UntilPushed,
    /// Wait until the observer has read the published draft
    UntilAcked,
}

struct Inner<T> {
    slots: [UnsafeCell<T>; 2],
    /// Generation of the newest published slot
    published: AtomicU64,
    /// Newest generation the observer has finished copying
    acked: AtomicU64,
}

// SAFETY: a slot is written only by the mutator and only while the
// observer's acknowledgement proves it is not reading that slot (see
// `StateMutator::try_publish`); the generation counters order the
// accesses with release/acquire pairs.
unsafe impl<T: Send> Sync for Inner<T> {}

/// Create a queue whose first observed state is `initial`
pub fn state_queue<T: Copy + PartialEq + Send>(initial: T) -> (StateMutator<T>, StateObserver<T>) {
    let inner = Arc::new(Inner {
        slots: [UnsafeCell::new(initial), UnsafeCell::new(initial)],
        published: AtomicU64::new(0),
        acked: AtomicU64::new(0),
    });
    (
        StateMutator {
            inner: Arc::clone(&inner),
            draft: initial,
            pushed: initial,
            generation: 0,
        },
        StateObserver {
            inner,
            current: initial,
            generation: 0,
        },
    )
}

/// Control-loop end
pub struct StateMutator<T> {
    inner: Arc<Inner<T>>,
    draft: T,
    /// Last state actually published
    pushed: T,
    generation: u64,
}

impl<T: Copy + PartialEq + Send> StateMutator<T> {
    /// The next state to publish, initialised from the last one
    pub fn begin(&mut self) -> &mut T {
        &mut self.draft
    }

    /// Read-only view of the draft
    pub fn draft(&self) -> &T {
        &self.draft
    }

    /// Generation of the newest published state
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the observer has read everything published
    pub fn is_acked(&self) -> bool {
        self.inner.acked.load(Ordering::Acquire) >= self.generation
    }

    /// Whether the draft differs from what was last published
    pub fn is_dirty(&self) -> bool {
        self.draft != self.pushed
    }

    /// Publish the draft
    ///
    /// A draft equal to the last published state is not republished, so
    /// the observer sees no new generation. Returns false if `mode` is
    /// [`PushMode::Never`] and the queue was busy, or if the observer has
    /// gone away while waiting.
    pub fn push(&mut self, mode: PushMode) -> bool {
        if self.is_dirty() {
            let backoff = Backoff::new();
            while !self.try_publish() {
                if mode == PushMode::Never || self.observer_gone() {
                    return false;
                }
                wait(&backoff);
            }
        }

        if mode == PushMode::UntilAcked {
            let backoff = Backoff::new();
            while !self.is_acked() {
                if self.observer_gone() {
                    return false;
                }
                wait(&backoff);
            }
        }
        true
    }

    fn try_publish(&mut self) -> bool {
        let acked = self.inner.acked.load(Ordering::Acquire);
        if acked + 1 < self.generation {
            return false;
        }
        let next = self.generation + 1;
        // SAFETY: the observer has finished copying generation `acked`,
        // which is at least `generation - 1`, and reads only the slot of the
        // newest published generation. Slot `next % 2` belongs to
        // `generation - 1`, so nobody reads it until `published` moves.
        unsafe {
            *self.inner.slots[(next % 2) as usize].get() = self.draft;
        }
        self.inner.published.store(next, Ordering::Release);
        self.generation = next;
        self.pushed = self.draft;
        true
    }

    fn observer_gone(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }
}

fn wait(backoff: &Backoff) {
    if backoff.is_completed() {
        thread::sleep(WAIT_SLEEP);
    } else {
        backoff.snooze();
    }
}

/// Fast-path end
pub struct StateObserver<T> {
    inner: Arc<Inner<T>>,
    current: T,
    generation: u64,
}

impl<T: Copy + Send> StateObserver<T> {
    /// Take the newest snapshot if one was published since the last poll
    ///
    /// Never blocks.
    pub fn poll(&mut self) -> Option<&T> {
        let published = self.inner.published.load(Ordering::Acquire);
        if published == self.generation {
            return None;
        }
        // SAFETY: slot `published % 2` is not written again until this
        // generation is acknowledged below.
        self.current = unsafe { *self.inner.slots[(published % 2) as usize].get() };
        self.generation = published;
        self.inner.acked.store(published, Ordering::Release);
        Some(&self.current)
    }

    /// The last observed snapshot
    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
