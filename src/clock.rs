//! Microsecond clocks shared by all three roles.
//!
//! Stamps from different processes are only subtracted from each other by
//! the correlator, so every process of a run must use the same clock kind.
//! The monotonic clock is comparable between processes on one host; the
//! wall clock between NTP-synchronised hosts.

pub trait Clock: Send + Sync {
    fn now_micros(&self) -> u64;
}

/// System-wide `CLOCK_MONOTONIC`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

#[cfg(unix)]
impl Clock for MonotonicClock {
    fn now_micros(&self) -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec and CLOCK_MONOTONIC is
        // always available on supported unix targets.
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        if rc != 0 {
            return WallClock.now_micros();
        }
        ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000
    }
}

// Only comparable within this process.
#[cfg(not(unix))]
impl Clock for MonotonicClock {
    fn now_micros(&self) -> u64 {
        use std::sync::OnceLock;
        use std::time::Instant;

        static ANCHOR: OnceLock<Instant> = OnceLock::new();
        ANCHOR.get_or_init(Instant::now).elapsed().as_micros() as u64
    }
}

/// UTC wall-clock time in microseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now_micros(&self) -> u64 {
        chrono::Utc::now().timestamp_micros().max(0) as u64
    }
}
