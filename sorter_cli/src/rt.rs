//! Real-time scheduling helpers (Linux SCHED_FIFO / mlockall).

use crate::cli::RtLock;

#[cfg(target_os = "linux")]
pub fn setup_rt_once(rt: bool, prio: Option<i32>, lock: RtLock) {
    use libc::{
        MCL_CURRENT, MCL_FUTURE, SCHED_FIFO, mlockall, sched_get_priority_max,
        sched_get_priority_min, sched_param, sched_setscheduler,
    };
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !rt {
        return;
    }
    RT_ONCE.get_or_init(|| {
        // Memory locking per the selected mode. Failure is non-fatal: the
        // control loop still runs, just with page-fault jitter.
        let flags = match lock {
            RtLock::None => 0,
            RtLock::Current => MCL_CURRENT,
            RtLock::All => MCL_CURRENT | MCL_FUTURE,
        };
        if flags != 0 {
            let rc = unsafe { mlockall(flags) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                tracing::warn!(
                    errno = err.raw_os_error(),
                    "mlockall failed; continuing without memory locking (check RLIMIT_MEMLOCK)"
                );
            } else {
                tracing::info!(?lock, "process memory locked");
            }
        }

        // SCHED_FIFO at a modest priority unless the user picked one.
        let (min, max) = unsafe {
            (
                sched_get_priority_min(SCHED_FIFO),
                sched_get_priority_max(SCHED_FIFO),
            )
        };
        let prio = prio.unwrap_or_else(|| min.max(1)).clamp(min, max);
        let param = sched_param {
            sched_priority: prio,
        };
        let rc = unsafe { sched_setscheduler(0, SCHED_FIFO, &param) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            tracing::warn!(
                errno = err.raw_os_error(),
                prio,
                "SCHED_FIFO unavailable; running with the default scheduler"
            );
        } else {
            tracing::info!(prio, "SCHED_FIFO scheduling enabled");
        }
    });
}

#[cfg(not(target_os = "linux"))]
pub fn setup_rt_once(rt: bool, _prio: Option<i32>, _lock: RtLock) {
    if rt {
        tracing::warn!("real-time mode is only supported on Linux; ignoring --rt");
    }
}
