//! Thread entry points.

use std::ffi::c_void;

use oslayer_core::Handle;

use crate::handle::OsHandle;
use crate::runtime;

/// `void func(void *ptr)`, the thread and guarded-call function type.
pub type OsThreadFunction = unsafe extern "C" fn(*mut c_void);

/// User pointer handed to another thread. The C caller owns what it points at.
struct UserPtr(*mut c_void);

// SAFETY: the pointer is only passed back to the caller's own function.
unsafe impl Send for UserPtr {}

impl UserPtr {
    fn get(self) -> *mut c_void {
        self.0
    }
}

/// Start `func(ptr)` on a new thread.
///
/// Returns the zero handle when `func` is null or the thread cannot be
/// created. `params` is reserved and ignored. Pool exhaustion aborts.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn os_launch_thread(
    func: Option<OsThreadFunction>,
    ptr: *mut c_void,
    params: *mut c_void,
) -> OsHandle {
    let _ = params;
    let Some(func) = func else {
        tracing::warn!("os_launch_thread called with a null function");
        return OsHandle::ZERO;
    };
    let user = UserPtr(ptr);
    let handle = runtime::pool().launch_thread(move || {
        // SAFETY: the C caller guarantees `func` accepts `ptr`.
        unsafe { func(user.get()) }
    });
    handle.into()
}

/// Give up the caller's ownership of a launched thread. Does not join.
#[unsafe(no_mangle)]
pub extern "C" fn os_release_thread_handle(thread: OsHandle) {
    if thread.is_zero() {
        return;
    }
    if let Err(err) = runtime::pool().release_thread_handle(Handle::from(thread)) {
        tracing::warn!(%err, "os_release_thread_handle ignored");
    }
}

/// Kernel thread id of the calling thread.
#[unsafe(no_mangle)]
pub extern "C" fn os_get_tid() -> u32 {
    oslayer_core::current_thread_id() as u32
}
