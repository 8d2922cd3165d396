//! `sigaction` dispositions.

use std::fmt;
use std::ptr;

use super::{check, last_errno};

/// Flag bits the C library sets on every `sigaction` call by itself
/// (`SA_RESTORER`); they say nothing about what the installer asked for.
#[cfg(target_os = "linux")]
const LIBC_OWNED_FLAGS: libc::c_int = 0x0400_0000;
#[cfg(not(target_os = "linux"))]
const LIBC_OWNED_FLAGS: libc::c_int = 0;

/// Highest signal number compared when checking blocked masks.
const MASK_SIGNALS: libc::c_int = 64;

/// Process-wide disposition of one signal, as returned by `sigaction`.
#[derive(Clone, Copy)]
pub struct SignalDisposition {
    signum: libc::c_int,
    action: libc::sigaction,
}

impl SignalDisposition {
    /// Read the current disposition of `signum` without changing it.
    pub fn query(signum: libc::c_int) -> Result<Self, i32> {
        // SAFETY: all-zero is a valid `sigaction` value; it is overwritten below.
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        // SAFETY: a null new-action pointer only queries; `action` is a valid out-pointer.
        let rc = unsafe { libc::sigaction(signum, ptr::null(), &mut action) };
        if rc != 0 {
            return Err(last_errno(libc::EINVAL));
        }
        Ok(Self { signum, action })
    }

    /// Route `signum` to `handler` and return the disposition it replaced.
    ///
    /// The handler runs with `SA_NODEFER` unset, so a second delivery of the
    /// same signal while it runs stays pending, and with `SA_ONSTACK`, so it
    /// still runs after the thread overflowed its stack (std gives its
    /// threads an alternate signal stack).
    pub fn install(signum: libc::c_int, handler: extern "C" fn(libc::c_int)) -> Result<Self, i32> {
        // SAFETY: all-zero is a valid `sigaction` value; fields are set below.
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        action.sa_sigaction = handler as usize as libc::sighandler_t;
        action.sa_flags = libc::SA_ONSTACK;
        // SAFETY: `sa_mask` is a valid sigset_t out-pointer.
        unsafe { libc::sigemptyset(&mut action.sa_mask) };
        // SAFETY: all-zero is valid; sigaction overwrites it.
        let mut previous: libc::sigaction = unsafe { std::mem::zeroed() };
        // SAFETY: both pointers are valid for the duration of the call.
        let rc = unsafe { libc::sigaction(signum, &action, &mut previous) };
        if rc != 0 {
            return Err(last_errno(libc::EINVAL));
        }
        Ok(Self {
            signum,
            action: previous,
        })
    }

    /// Reinstate this disposition.
    pub fn restore(&self) -> Result<(), i32> {
        // SAFETY: `self.action` came from a successful `sigaction` query.
        let rc = unsafe { libc::sigaction(self.signum, &self.action, ptr::null_mut()) };
        check(rc).map_err(|_| last_errno(libc::EINVAL))
    }

    #[must_use]
    pub fn signum(&self) -> libc::c_int {
        self.signum
    }

    /// Handler address (`SIG_DFL` is 0, `SIG_IGN` is 1).
    #[must_use]
    pub fn handler_address(&self) -> usize {
        self.action.sa_sigaction as usize
    }

    #[must_use]
    pub fn flags(&self) -> libc::c_int {
        self.action.sa_flags
    }

    /// Flags as the installer requested them.
    #[must_use]
    pub fn requested_flags(&self) -> libc::c_int {
        self.action.sa_flags & !LIBC_OWNED_FLAGS
    }

    /// Whether `signum` is blocked while the handler runs.
    #[must_use]
    pub fn blocks(&self, signum: libc::c_int) -> bool {
        // SAFETY: `sa_mask` is an initialized sigset_t; out-of-range numbers
        // make sigismember return -1.
        unsafe { libc::sigismember(&self.action.sa_mask, signum) == 1 }
    }
}

impl PartialEq for SignalDisposition {
    fn eq(&self, other: &Self) -> bool {
        self.signum == other.signum
            && self.handler_address() == other.handler_address()
            && self.requested_flags() == other.requested_flags()
            && (1..=MASK_SIGNALS).all(|signum| self.blocks(signum) == other.blocks(signum))
    }
}

impl Eq for SignalDisposition {}

impl fmt::Debug for SignalDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalDisposition")
            .field("signum", &self.signum)
            .field("handler", &format_args!("{:#x}", self.handler_address()))
            .field("flags", &format_args!("{:#x}", self.flags()))
            .finish()
    }
}

/// Send `signum` to the calling thread.
pub fn raise(signum: libc::c_int) -> Result<(), i32> {
    // SAFETY: raise has no memory-safety preconditions.
    let rc = unsafe { libc::raise(signum) };
    if rc == 0 {
        Ok(())
    } else {
        Err(last_errno(libc::EINVAL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn ignore(_signum: libc::c_int) {}

    #[test]
    fn install_then_restore_round_trips() {
        // SIGUSR2 is not used by the test harness.
        let before = SignalDisposition::query(libc::SIGUSR2).unwrap();
        let previous = SignalDisposition::install(libc::SIGUSR2, ignore).unwrap();
        assert_eq!(previous, before);
        let during = SignalDisposition::query(libc::SIGUSR2).unwrap();
        assert_eq!(during.handler_address(), ignore as usize);
        previous.restore().unwrap();
        assert_eq!(SignalDisposition::query(libc::SIGUSR2).unwrap(), before);
    }

    #[test]
    fn installed_handler_runs_on_the_alternate_stack() {
        let previous = SignalDisposition::install(libc::SIGUSR2, ignore).unwrap();
        let during = SignalDisposition::query(libc::SIGUSR2).unwrap();
        previous.restore().unwrap();
        assert_ne!(during.flags() & libc::SA_ONSTACK, 0, "{during:?}");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn restorer_bit_does_not_change_equality() {
        let queried = SignalDisposition::query(libc::SIGUSR2).unwrap();
        let mut restored = queried;
        restored.action.sa_flags ^= LIBC_OWNED_FLAGS;
        assert_ne!(restored.flags(), queried.flags());
        assert_eq!(restored, queried);
    }

    #[test]
    fn blocked_mask_is_part_of_equality() {
        let queried = SignalDisposition::query(libc::SIGUSR2).unwrap();
        let mut widened = queried;
        let already = widened.blocks(libc::SIGUSR1);
        // SAFETY: `sa_mask` is an initialized sigset_t.
        unsafe {
            if already {
                libc::sigdelset(&mut widened.action.sa_mask, libc::SIGUSR1);
            } else {
                libc::sigaddset(&mut widened.action.sa_mask, libc::SIGUSR1);
            }
        }
        assert_ne!(widened, queried);
    }

    #[test]
    fn invalid_signal_is_rejected() {
        assert!(SignalDisposition::query(-1).is_err());
    }
}
