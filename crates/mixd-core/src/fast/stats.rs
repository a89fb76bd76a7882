//! Fast path statistics
//!
//! Written by the fast path with relaxed atomics, read by the control loop
//! and clients. The real-time thread never logs; anything worth reporting
//! lands here and is logged by whoever reads it.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use crate::config::{WarmupPolicy, MAX_FAST_TRACKS};

/// How a slot's provider looked at the start of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FillClass {
    /// At least a full cycle's worth
    Full = 0,
    /// Some, but less than a cycle
    Partial = 1,
    /// Nothing
    Empty = 2,
}

impl FillClass {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => FillClass::Full,
            1 => FillClass::Partial,
            _ => FillClass::Empty,
        }
    }
}

/// Monotonic full/partial/empty counters for one fast slot
#[derive(Debug, Default)]
pub struct UnderrunCounters {
    full: AtomicU32,
    partial: AtomicU32,
    empty: AtomicU32,
    last: AtomicU8,
}

/// Snapshot of [`UnderrunCounters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnderrunSnapshot {
    pub full: u32,
    pub partial: u32,
    pub empty: u32,
    pub last: FillClass,
}

impl UnderrunCounters {
    pub fn record(&self, class: FillClass) {
        let counter = match class {
            FillClass::Full => &self.full,
            FillClass::Partial => &self.partial,
            FillClass::Empty => &self.empty,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.last.store(class as u8, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UnderrunSnapshot {
        UnderrunSnapshot {
            full: self.full.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            last: FillClass::from_u8(self.last.load(Ordering::Relaxed)),
        }
    }
}

/// Shared fast path statistics
#[derive(Debug)]
pub struct FastMixerStats {
    cycles: AtomicU64,
    warmup_cycles: AtomicU32,
    warmed_up: AtomicBool,
    steady_cycles: AtomicU64,
    cycle_ns_min: AtomicU64,
    cycle_ns_max: AtomicU64,
    cycle_ns_total: AtomicU64,
    /// Cycles that took longer than a period
    overruns: AtomicU64,
    write_errors: AtomicU64,
    short_writes: AtomicU64,
    frames_written: AtomicU64,
    /// Sink frames presented at the last timestamp
    frames_presented: AtomicU64,
    realtime: AtomicBool,
    tracks: [UnderrunCounters; MAX_FAST_TRACKS],
}

/// Plain copy of [`FastMixerStats`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FastStatsSnapshot {
    pub cycles: u64,
    pub warmup_cycles: u32,
    pub warmed_up: bool,
    pub steady_cycles: u64,
    pub cycle_min: Duration,
    pub cycle_mean: Duration,
    pub cycle_max: Duration,
    pub overruns: u64,
    pub write_errors: u64,
    pub short_writes: u64,
    pub frames_written: u64,
    pub frames_presented: u64,
    pub realtime: bool,
}

impl FastMixerStats {
    pub fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            warmup_cycles: AtomicU32::new(0),
            warmed_up: AtomicBool::new(false),
            steady_cycles: AtomicU64::new(0),
            cycle_ns_min: AtomicU64::new(u64::MAX),
            cycle_ns_max: AtomicU64::new(0),
            cycle_ns_total: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            short_writes: AtomicU64::new(0),
            frames_written: AtomicU64::new(0),
            frames_presented: AtomicU64::new(0),
            realtime: AtomicBool::new(false),
            tracks: std::array::from_fn(|_| UnderrunCounters::default()),
        }
    }

    pub fn track(&self, slot: usize) -> Option<UnderrunSnapshot> {
        self.tracks.get(slot).map(UnderrunCounters::snapshot)
    }

    pub(crate) fn record_fill(&self, slot: usize, class: FillClass) {
        if let Some(counters) = self.tracks.get(slot) {
            counters.record(class);
        }
    }

    pub(crate) fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_warmup_cycle(&self) {
        self.warmup_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_warmed_up(&self, warmed_up: bool) {
        self.warmed_up.store(warmed_up, Ordering::Relaxed);
    }

    pub(crate) fn record_steady_cycle(&self, elapsed: Duration, period: Duration) {
        let ns = elapsed.as_nanos() as u64;
        self.steady_cycles.fetch_add(1, Ordering::Relaxed);
        self.cycle_ns_total.fetch_add(ns, Ordering::Relaxed);
        self.cycle_ns_min.fetch_min(ns, Ordering::Relaxed);
        self.cycle_ns_max.fetch_max(ns, Ordering::Relaxed);
        if elapsed > period {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_write(&self, requested: usize, written: usize) {
        self.frames_written.fetch_add(written as u64, Ordering::Relaxed);
        if written < requested {
            self.short_writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_frames_presented(&self, frames: u64) {
        self.frames_presented.store(frames, Ordering::Relaxed);
    }

    pub(crate) fn set_realtime(&self, realtime: bool) {
        self.realtime.store(realtime, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FastStatsSnapshot {
        let steady_cycles = self.steady_cycles.load(Ordering::Relaxed);
        let total = self.cycle_ns_total.load(Ordering::Relaxed);
        let min = self.cycle_ns_min.load(Ordering::Relaxed);
        FastStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            warmup_cycles: self.warmup_cycles.load(Ordering::Relaxed),
            warmed_up: self.warmed_up.load(Ordering::Relaxed),
            steady_cycles,
            cycle_min: Duration::from_nanos(if steady_cycles == 0 { 0 } else { min }),
            cycle_mean: Duration::from_nanos(total.checked_div(steady_cycles).unwrap_or(0)),
            cycle_max: Duration::from_nanos(self.cycle_ns_max.load(Ordering::Relaxed)),
            overruns: self.overruns.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            short_writes: self.short_writes.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_presented: self.frames_presented.load(Ordering::Relaxed),
            realtime: self.realtime.load(Ordering::Relaxed),
        }
    }
}

impl Default for FastMixerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks whether cycle timing has settled after leaving cold idle
///
/// Warm-up ends after `min_cycles` consecutive cycles whose spacing is
/// within `tolerance` of the nominal period, or after `max_cycles` cycles
/// regardless.
#[derive(Debug, Clone)]
pub struct Warmup {
    policy: WarmupPolicy,
    cycles: u32,
    in_tolerance: u32,
    done: bool,
}

impl Warmup {
    pub fn new(policy: WarmupPolicy) -> Self {
        Self {
            policy,
            cycles: 0,
            in_tolerance: 0,
            done: false,
        }
    }

    pub fn reset(&mut self) {
        self.cycles = 0;
        self.in_tolerance = 0;
        self.done = false;
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed the spacing between this cycle and the last; returns true on
    /// the cycle warm-up ends
    pub fn observe(&mut self, spacing: Duration, period: Duration) -> bool {
        if self.done {
            return false;
        }
        self.cycles += 1;
        let nominal = period.as_secs_f64();
        let deviation = (spacing.as_secs_f64() - nominal).abs();
        if deviation <= nominal * self.policy.tolerance {
            self.in_tolerance += 1;
        } else {
            self.in_tolerance = 0;
        }
        if self.in_tolerance >= self.policy.min_cycles || self.cycles >= self.policy.max_cycles {
            self.done = true;
        }
        self.done
    }
}
