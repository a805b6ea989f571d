//! Real-time scheduling helpers (Linux SCHED_FIFO / mlockall).
//!
//! The pour loop samples the load cell on a fixed cadence; scheduling
//! jitter shows up directly as stall-timer noise, so operators on busy
//! hosts can opt into SCHED_FIFO and memory locking.

use crate::cli::RtLock;

#[cfg(target_os = "linux")]
pub fn setup_rt_once(rt: bool, prio: Option<i32>, lock: RtLock) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !rt {
        return;
    }
    RT_ONCE.get_or_init(|| {
        apply_mem_lock(lock);

        let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
        let min = unsafe { libc::sched_get_priority_min(libc::SCHED_FIFO) };
        if max < 0 || min < 0 {
            tracing::warn!("cannot query SCHED_FIFO priority range; skipping rt setup");
            return;
        }
        let prio = prio.unwrap_or((min + max) / 2).clamp(min, max);
        let param = libc::sched_param {
            sched_priority: prio,
        };
        let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
        if rc != 0 {
            tracing::warn!(
                error = %std::io::Error::last_os_error(),
                prio,
                "SCHED_FIFO not applied (missing privileges?); continuing without it"
            );
        } else {
            tracing::info!(prio, "SCHED_FIFO enabled");
        }
    });
}

#[cfg(target_os = "linux")]
fn apply_mem_lock(lock: RtLock) {
    use libc::{MCL_CURRENT, MCL_FUTURE, mlockall};
    let flags = match lock {
        RtLock::None => return,
        RtLock::Current => MCL_CURRENT,
        RtLock::All => MCL_CURRENT | MCL_FUTURE,
    };
    let rc = unsafe { mlockall(flags) };
    if rc != 0 {
        tracing::warn!(
            error = %std::io::Error::last_os_error(),
            ?lock,
            "mlockall failed (memlock ulimit?); continuing without it"
        );
    } else {
        tracing::info!(?lock, "process memory locked");
    }
}

#[cfg(not(target_os = "linux"))]
pub fn setup_rt_once(rt: bool, _prio: Option<i32>, _lock: RtLock) {
    if rt {
        tracing::warn!("real-time mode is not supported on this OS; continuing without it");
    }
}
