//! Process-wide configuration for the shared-memory poller.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default poller interval, in microseconds (`MINIPC_DEFAULT_POLL` in the
/// original: 10 milliseconds).
pub const DEFAULT_POLL_INTERVAL_US: u64 = 10_000;

static POLL_INTERVAL_US: AtomicU64 = AtomicU64::new(DEFAULT_POLL_INTERVAL_US);

/// Set the shared-memory transport's polling period, process-wide. Returns
/// the previous interval. Fails with [`Error::Invalid`] for a non-positive
/// interval.
pub fn set_poll_interval(micros: u64) -> Result<u64> {
    if micros == 0 {
        return Err(Error::Invalid);
    }
    Ok(POLL_INTERVAL_US.swap(micros, Ordering::SeqCst))
}

/// Current shared-memory transport polling period, in microseconds.
pub fn poll_interval() -> u64 {
    POLL_INTERVAL_US.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test_shim::serial;

    mod serial_test_shim {
        // A single-process, hand-rolled stand-in for a `serial_test`-style
        // guard: tests that mutate the global poll interval must not run
        // concurrently with each other.
        use std::sync::Mutex;
        pub static LOCK: Mutex<()> = Mutex::new(());
        pub fn serial() -> std::sync::MutexGuard<'static, ()> {
            LOCK.lock().unwrap_or_else(|e| e.into_inner())
        }
    }

    #[test]
    fn rejects_zero_interval() {
        let _g = serial();
        assert!(set_poll_interval(0).is_err());
    }

    #[test]
    fn set_and_restore_interval() {
        let _g = serial();
        let prev = poll_interval();
        let old = set_poll_interval(5_000).unwrap();
        assert_eq!(poll_interval(), 5_000);
        set_poll_interval(old).unwrap();
        assert_eq!(poll_interval(), prev);
    }
}
