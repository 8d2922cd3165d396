//! Guarded-call entry point.

use std::ffi::c_void;

use oslayer_core::{FaultHandler, SafeCallGuard};

use crate::thread_abi::OsThreadFunction;

/// Run `func(ptr)` with hardware faults routed to `fail_handler(ptr)`.
///
/// A fault inside `func` calls `fail_handler` (if non-null) and terminates
/// the process. A null `func` does nothing. If the fault traps cannot be
/// installed, `func` still runs, unguarded.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn os_safe_call(
    func: Option<OsThreadFunction>,
    fail_handler: Option<FaultHandler>,
    ptr: *mut c_void,
) {
    let Some(func) = func else {
        return;
    };
    match SafeCallGuard::enter(fail_handler, ptr) {
        Ok(guard) => {
            // SAFETY: the C caller guarantees `func` accepts `ptr`.
            unsafe { func(ptr) };
            if let Err(err) = guard.exit() {
                tracing::error!(%err, "os_safe_call could not restore fault traps");
            }
        }
        Err(err) => {
            tracing::error!(%err, "os_safe_call running unguarded");
            // SAFETY: as above.
            unsafe { func(ptr) };
        }
    }
}
