//! Native primitives behind the entity layer.
//!
//! Thin wrappers over the host's pthread objects, `sigaction`, clocks and
//! process termination. Every primitive lives in a `Box` so its address stays
//! fixed for the lifetime of the owning entity, as pthread requires.
//!
//! Failures are reported as raw errno values (`Err(i32)`); the typed
//! operations in [`crate::sync`] and [`crate::safe_call`] translate them into
//! [`LayerError`](crate::LayerError).

pub mod clock;
pub mod signal;
pub mod sync;

pub use clock::{CONDVAR_CLOCK, condvar_deadline, monotonic_micros};
pub use signal::{SignalDisposition, raise};
pub use sync::{NativeCondvar, NativeMutex, NativeRwLock};

/// Errno of the last failed libc call on this thread.
#[inline]
pub(crate) fn last_errno(default_errno: i32) -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(default_errno)
}

#[inline]
pub(crate) fn check(rc: libc::c_int) -> Result<(), i32> {
    if rc == 0 { Ok(()) } else { Err(rc) }
}

/// Terminate the process abnormally. Never unwinds, never runs destructors.
pub fn abort_process() -> ! {
    std::process::abort()
}

/// Kernel thread id of the calling thread.
#[cfg(target_os = "linux")]
#[must_use]
pub fn current_tid() -> i64 {
    // SAFETY: gettid takes no arguments and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as i64 }
}

/// Kernel thread id of the calling thread.
#[cfg(target_vendor = "apple")]
#[must_use]
pub fn current_tid() -> i64 {
    let mut tid: u64 = 0;
    // SAFETY: a null thread argument selects the calling thread; `tid` is a
    // valid out-pointer.
    let rc = unsafe { libc::pthread_threadid_np(0, &mut tid) };
    if rc == 0 { tid as i64 } else { 0 }
}

/// Kernel thread id of the calling thread.
#[cfg(not(any(target_os = "linux", target_vendor = "apple")))]
#[must_use]
pub fn current_tid() -> i64 {
    0
}

/// Write raw bytes to stderr with a single `write(2)`.
///
/// Async-signal-safe: no allocation, no locks, errors ignored.
pub fn write_stderr_raw(bytes: &[u8]) {
    // SAFETY: `bytes` is a valid readable buffer of `bytes.len()` bytes and
    // fd 2 is only written, never closed, here.
    let _ = unsafe { libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len()) };
}
