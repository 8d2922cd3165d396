//! Host clocks.

use std::time::Duration;

const NANOS_PER_SEC: i64 = 1_000_000_000;

fn read_clock(clock: libc::clockid_t) -> libc::timespec {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out-pointer and both clocks used here always exist.
    unsafe { libc::clock_gettime(clock, &mut ts) };
    ts
}

/// Microseconds on the monotonic clock. Unaffected by wall-clock changes.
#[must_use]
pub fn monotonic_micros() -> u64 {
    let ts = read_clock(libc::CLOCK_MONOTONIC);
    (ts.tv_sec as u64)
        .saturating_mul(1_000_000)
        .saturating_add(ts.tv_nsec as u64 / 1_000)
}

/// Clock that condition-variable deadlines are measured on. Linux lets a
/// condition variable wait on the monotonic clock; other hosts only offer
/// `CLOCK_REALTIME`.
#[cfg(target_os = "linux")]
pub const CONDVAR_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;
#[cfg(not(target_os = "linux"))]
pub const CONDVAR_CLOCK: libc::clockid_t = libc::CLOCK_REALTIME;

/// Absolute instant on `clock`, `timeout` from now. Saturates instead of
/// overflowing.
#[must_use]
pub fn clock_after(clock: libc::clockid_t, timeout: Duration) -> libc::timespec {
    let now = read_clock(clock);
    let add_secs = libc::time_t::try_from(timeout.as_secs()).unwrap_or(libc::time_t::MAX);
    let mut sec = now.tv_sec.saturating_add(add_secs);
    let mut nsec = now.tv_nsec as i64 + i64::from(timeout.subsec_nanos());
    if nsec >= NANOS_PER_SEC {
        nsec -= NANOS_PER_SEC;
        sec = sec.saturating_add(1);
    }
    libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec as _,
    }
}

/// The `abstime` `pthread_cond_timedwait` expects for a wait of `timeout`
/// on a condition variable bound to [`CONDVAR_CLOCK`].
#[must_use]
pub fn condvar_deadline(timeout: Duration) -> libc::timespec {
    clock_after(CONDVAR_CLOCK, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_never_goes_backwards() {
        let a = monotonic_micros();
        std::thread::sleep(Duration::from_millis(2));
        let b = monotonic_micros();
        assert!(b >= a + 1_000, "{a} -> {b}");
    }

    #[test]
    fn clock_after_normalizes_nanoseconds() {
        let ts = clock_after(libc::CLOCK_REALTIME, Duration::from_nanos(999_999_999));
        assert!((0..NANOS_PER_SEC).contains(&(ts.tv_nsec as i64)));
    }

    #[test]
    fn clock_after_saturates() {
        let ts = condvar_deadline(Duration::MAX);
        assert_eq!(ts.tv_sec, libc::time_t::MAX);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn condvar_deadline_is_on_the_monotonic_clock() {
        let ts = condvar_deadline(Duration::ZERO);
        let deadline_us = ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000;
        let now = monotonic_micros();
        // Wall-clock time is decades away from the monotonic origin.
        assert!(now.abs_diff(deadline_us) < 1_000_000, "{deadline_us} vs {now}");
    }
}
