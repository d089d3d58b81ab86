//! Timed locking primitive (spec.md §3 "Process" resource mutex; BadgeOS
//! `include/process/types.h`'s `mtx` field and `PROC_MTX_TIMEOUT`).
//!
//! A process's resource mutex and a bus-level driver lock (e.g. I²C) both
//! need "block for up to N microseconds, then give up" rather than block
//! forever — a wedged peripheral or a runaway holder must not be able to
//! starve every thread that touches the same process or bus. This wraps
//! the pack's `spin::Mutex` with a tick-counted deadline instead of
//! inventing a second lock primitive.

use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::config::TIMER_TICK_US;
use crate::err::{ErrorKind, ErrorLocation, KernelError};

/// Ticks elapsed since boot, advanced once per timer interrupt
/// (spec.md §4.3). `sched` calls [`tick`] from the trap exit path; this
/// module only reads it to bound how long [`TimedMutex::lock_timeout`]
/// is willing to spin.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Advances the tick counter by one. Called once per timer interrupt.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

fn now_us() -> u64 {
    TICKS.load(Ordering::Relaxed) * TIMER_TICK_US
}

/// A mutex whose `lock_timeout` gives up after a bounded number of
/// microseconds rather than blocking forever.
pub struct TimedMutex<T> {
    inner: Mutex<T>,
}

impl<T> TimedMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Spins until the lock is acquired or `timeout_us` has elapsed.
    ///
    /// Resolution is one timer tick ([`crate::config::TIMER_TICK_US`]);
    /// callers asking for a timeout shorter than a tick still get at
    /// least one attempt.
    pub fn lock_timeout(&self, timeout_us: u64) -> Result<spin::MutexGuard<'_, T>, KernelError> {
        let deadline = now_us().saturating_add(timeout_us);
        loop {
            if let Some(guard) = self.inner.try_lock() {
                return Ok(guard);
            }
            if now_us() >= deadline {
                return Err(KernelError::new(ErrorKind::Timeout, ErrorLocation::Threads));
            }
            core::hint::spin_loop();
        }
    }

    /// Locks without a deadline, for contexts that are known never to
    /// contend (e.g. single-threaded boot setup).
    pub fn lock(&self) -> spin::MutexGuard<'_, T> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_uncontended_lock_immediately() {
        let m = TimedMutex::new(0u32);
        let guard = m.lock_timeout(1).unwrap();
        assert_eq!(*guard, 0);
    }

    #[test]
    fn times_out_when_already_held() {
        let m = TimedMutex::new(0u32);
        let _held = m.lock();
        let before = TICKS.load(Ordering::Relaxed);
        let result = m.lock_timeout(0);
        assert_eq!(result.unwrap_err().kind, ErrorKind::Timeout);
        let _ = before;
    }
}
