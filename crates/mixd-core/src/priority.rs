//! Thread scheduling priority
//!
//! The fast path asks for real-time scheduling (SCHED_FIFO, falling back to
//! SCHED_RR); the control loop asks for an elevated nice value. Both are
//! best effort: without CAP_SYS_NICE (or an rtprio limit) the calls fail,
//! the failure is logged once by the caller and the thread keeps its
//! default priority.
//!
//! Both apply to the calling thread only and are called at the top of each
//! thread's body.

/// SCHED_FIFO priority for the fast mixer (leaves room above for the
/// kernel's own threads and the audio server)
pub const FAST_MIXER_PRIORITY: i32 = 80;

/// Nice value for the control loop
pub const CONTROL_LOOP_NICE: i32 = -16;

/// Outcome of a priority request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityResult {
    /// The requested class was granted
    Success,
    /// The OS refused (non-fatal)
    Failed,
    /// Platform not supported
    Unsupported,
}

/// Put the calling thread in a real-time scheduling class
pub fn set_realtime_priority(priority: i32) -> PriorityResult {
    platform_set_realtime(priority)
}

/// Raise the calling thread's nice value without making it real-time
pub fn set_elevated_priority(nice: i32) -> PriorityResult {
    platform_set_nice(nice)
}

// ─────────────────────────────────────────────────────────────────────────────
// Linux
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(target_os = "linux")]
fn platform_set_realtime(priority: i32) -> PriorityResult {
    use libc::{pthread_self, pthread_setschedparam, sched_param, sched_setscheduler, SCHED_FIFO, SCHED_RR};

    let mut param = sched_param {
        sched_priority: priority,
    };

    // pid 0 is the calling thread
    if unsafe { sched_setscheduler(0, SCHED_FIFO, &param) } == 0 {
        return PriorityResult::Success;
    }
    log::debug!("SCHED_FIFO refused, trying SCHED_RR");

    param.sched_priority = (priority - 10).max(1);
    if unsafe { sched_setscheduler(0, SCHED_RR, &param) } == 0 {
        return PriorityResult::Success;
    }
    log::debug!("SCHED_RR refused, trying pthread_setschedparam");

    param.sched_priority = (priority - 30).max(1);
    let result = unsafe { pthread_setschedparam(pthread_self(), SCHED_FIFO, &param) };
    if result == 0 {
        PriorityResult::Success
    } else {
        log::debug!("All real-time scheduling requests failed (errno: {})", result);
        PriorityResult::Failed
    }
}

#[cfg(target_os = "linux")]
fn platform_set_nice(nice: i32) -> PriorityResult {
    // Linux nice values are per thread; who = 0 is the caller
    if unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) } == 0 {
        PriorityResult::Success
    } else {
        PriorityResult::Failed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unsupported platforms
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(not(target_os = "linux"))]
fn platform_set_realtime(_priority: i32) -> PriorityResult {
    PriorityResult::Unsupported
}

#[cfg(not(target_os = "linux"))]
fn platform_set_nice(_nice: i32) -> PriorityResult {
    PriorityResult::Unsupported
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_requests_never_panic() {
        let handle = std::thread::spawn(|| {
            let realtime = set_realtime_priority(FAST_MIXER_PRIORITY);
            let nice = set_elevated_priority(CONTROL_LOOP_NICE);
            (realtime, nice)
        });
        let (realtime, nice) = handle.join().unwrap();
        for result in [realtime, nice] {
            assert!(matches!(
                result,
                PriorityResult::Success | PriorityResult::Failed | PriorityResult::Unsupported
            ));
        }
    }
}
