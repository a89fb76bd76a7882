//! Deferred reclamation for state shared with the fast path
//!
//! Per-track shared state ([`crate::track::TrackShared`]) is referenced by
//! the client handle, the control loop and the fast path at once. It is
//! held in `basedrop::Shared<T>` rather than `Arc<T>` so that whichever
//! reference dies last, possibly on the real-time thread, only enqueues the
//! allocation. A background collector thread performs the actual free.
//!
//! ```ignore
//! use basedrop::Shared;
//! use mixd_core::gc::gc_handle;
//!
//! let shared = Shared::new(&gc_handle(), TrackShared::new());
//! let for_fast_path = shared.clone();
//! drop(for_fast_path); // enqueues only if this was the last reference
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Collection interval; reclaiming late is harmless
const COLLECT_INTERVAL: Duration = Duration::from_millis(50);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("mixd-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives and dies on this thread
            let mut collector = Collector::new();
            tx.send(collector.handle()).expect("Failed to send GC handle");

            log::debug!("Collector thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn collector thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Handle for allocating `basedrop::Shared<T>` values
///
/// Starts the collector thread on first use.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}
