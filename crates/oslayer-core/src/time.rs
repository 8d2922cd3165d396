//! Monotonic time and sleeping.

use std::time::Duration;

use crate::native;

/// `endt_us` value meaning "wait forever".
pub const NO_DEADLINE: u64 = u64::MAX;

/// Microseconds on the monotonic clock.
#[must_use]
pub fn now_microseconds() -> u64 {
    native::monotonic_micros()
}

/// Block the calling thread for at least `ms` milliseconds.
pub fn sleep_milliseconds(ms: u32) {
    std::thread::sleep(Duration::from_millis(u64::from(ms)));
}

/// Absolute end time of a condition-variable wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    Never,
    /// Monotonic microseconds, as returned by [`now_microseconds`].
    At(u64),
}

impl Deadline {
    /// Interpret a raw `endt_us` argument.
    #[must_use]
    pub const fn from_end_us(endt_us: u64) -> Self {
        if endt_us == NO_DEADLINE {
            Self::Never
        } else {
            Self::At(endt_us)
        }
    }

    /// Time left before the deadline, zero once it has passed, `None` when
    /// there is no deadline.
    #[must_use]
    pub fn remaining(self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::At(end) => Some(Duration::from_micros(
                end.saturating_sub(now_microseconds()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_means_never() {
        assert_eq!(Deadline::from_end_us(NO_DEADLINE), Deadline::Never);
        assert_eq!(Deadline::Never.remaining(), None);
    }

    #[test]
    fn past_deadline_has_zero_remaining() {
        let deadline = Deadline::from_end_us(0);
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn sleep_advances_the_clock() {
        let start = now_microseconds();
        sleep_milliseconds(5);
        assert!(now_microseconds() - start >= 5_000);
    }

    #[test]
    fn future_deadline_counts_down() {
        let deadline = Deadline::from_end_us(now_microseconds() + 60_000_000);
        let left = deadline.remaining().unwrap();
        assert!(left > Duration::from_secs(59));
        assert!(left <= Duration::from_secs(60));
    }
}
