//! Mutex, reader/writer mutex and condition-variable entry points.
//!
//! Lock and signal calls return nothing to C; failures (stale handle, wrong
//! kind, unlocking a mutex the caller does not hold) are logged and ignored.
//! Waits return 1 when woken and 0 on timeout or failure.

use oslayer_core::{Handle, LayerError};

use crate::handle::OsHandle;
use crate::runtime;

#[inline]
fn report(op: &'static str, result: Result<(), LayerError>) {
    if let Err(err) = result {
        tracing::warn!(op, %err, errno = err.errno(), "oslayer call ignored");
    }
}

#[inline]
fn report_wait(op: &'static str, result: Result<bool, LayerError>) -> i32 {
    match result {
        Ok(woken) => i32::from(woken),
        Err(err) => {
            tracing::warn!(op, %err, errno = err.errno(), "oslayer wait failed");
            0
        }
    }
}

// ---------------------------------------------------------------------------
// Recursive mutexes
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn os_mutex_alloc() -> OsHandle {
    runtime::pool().mutex_alloc().into()
}

#[unsafe(no_mangle)]
pub extern "C" fn os_mutex_release(mutex: OsHandle) {
    report("os_mutex_release", runtime::pool().mutex_release(Handle::from(mutex)));
}

#[unsafe(no_mangle)]
pub extern "C" fn os_mutex_take(mutex: OsHandle) {
    report("os_mutex_take", runtime::pool().mutex_take(Handle::from(mutex)));
}

#[unsafe(no_mangle)]
pub extern "C" fn os_mutex_drop(mutex: OsHandle) {
    report("os_mutex_drop", runtime::pool().mutex_drop(Handle::from(mutex)));
}

// ---------------------------------------------------------------------------
// Reader/writer mutexes
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn os_rw_mutex_alloc() -> OsHandle {
    runtime::pool().rw_mutex_alloc().into()
}

#[unsafe(no_mangle)]
pub extern "C" fn os_rw_mutex_release(rw_mutex: OsHandle) {
    report(
        "os_rw_mutex_release",
        runtime::pool().rw_mutex_release(Handle::from(rw_mutex)),
    );
}

#[unsafe(no_mangle)]
pub extern "C" fn os_rw_mutex_take_r(rw_mutex: OsHandle) {
    report(
        "os_rw_mutex_take_r",
        runtime::pool().rw_mutex_take_r(Handle::from(rw_mutex)),
    );
}

#[unsafe(no_mangle)]
pub extern "C" fn os_rw_mutex_drop_r(rw_mutex: OsHandle) {
    report(
        "os_rw_mutex_drop_r",
        runtime::pool().rw_mutex_drop_r(Handle::from(rw_mutex)),
    );
}

#[unsafe(no_mangle)]
pub extern "C" fn os_rw_mutex_take_w(rw_mutex: OsHandle) {
    report(
        "os_rw_mutex_take_w",
        runtime::pool().rw_mutex_take_w(Handle::from(rw_mutex)),
    );
}

#[unsafe(no_mangle)]
pub extern "C" fn os_rw_mutex_drop_w(rw_mutex: OsHandle) {
    report(
        "os_rw_mutex_drop_w",
        runtime::pool().rw_mutex_drop_w(Handle::from(rw_mutex)),
    );
}

// ---------------------------------------------------------------------------
// Condition variables
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn os_condition_variable_alloc() -> OsHandle {
    runtime::pool().condition_variable_alloc().into()
}

#[unsafe(no_mangle)]
pub extern "C" fn os_condition_variable_release(cv: OsHandle) {
    report(
        "os_condition_variable_release",
        runtime::pool().condition_variable_release(Handle::from(cv)),
    );
}

/// Wait on `cv` holding `mutex` until signalled or until the monotonic
/// clock reaches `endt_us` (`u64::MAX`: no deadline).
#[unsafe(no_mangle)]
pub extern "C" fn os_condition_variable_wait(cv: OsHandle, mutex: OsHandle, endt_us: u64) -> i32 {
    report_wait(
        "os_condition_variable_wait",
        runtime::pool().condition_variable_wait(Handle::from(cv), Handle::from(mutex), endt_us),
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn os_condition_variable_wait_rw_r(
    cv: OsHandle,
    mutex_rw: OsHandle,
    endt_us: u64,
) -> i32 {
    report_wait(
        "os_condition_variable_wait_rw_r",
        runtime::pool().condition_variable_wait_rw_r(
            Handle::from(cv),
            Handle::from(mutex_rw),
            endt_us,
        ),
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn os_condition_variable_wait_rw_w(
    cv: OsHandle,
    mutex_rw: OsHandle,
    endt_us: u64,
) -> i32 {
    report_wait(
        "os_condition_variable_wait_rw_w",
        runtime::pool().condition_variable_wait_rw_w(
            Handle::from(cv),
            Handle::from(mutex_rw),
            endt_us,
        ),
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn os_condition_variable_signal(cv: OsHandle) {
    report(
        "os_condition_variable_signal",
        runtime::pool().condition_variable_signal(Handle::from(cv)),
    );
}

#[unsafe(no_mangle)]
pub extern "C" fn os_condition_variable_broadcast(cv: OsHandle) {
    report(
        "os_condition_variable_broadcast",
        runtime::pool().condition_variable_broadcast(Handle::from(cv)),
    );
}
