//! Guarded calls.
//!
//! [`safe_call`] runs a function with the hardware-fault signals
//! ([`FAULT_SIGNALS`]) routed to a dispatcher. If one of them is delivered
//! while the function runs, the dispatcher reports to the innermost
//! `fail_handler` registered on the faulting thread and then aborts the
//! process. Execution never resumes after a fault.
//!
//! ## Chain
//!
//! Each thread keeps an intrusive stack of frames in a thread-local. A
//! [`SafeCallGuard`] pushes one frame on entry and unlinks it when dropped,
//! so an inner guarded call shadows the outer one only for its own extent.
//!
//! ## Signal table
//!
//! Dispositions are process-wide. Installation is reference counted under a
//! global lock: the first active guard in the process saves the previous
//! dispositions and installs the dispatcher, and the last guard to exit,
//! on whichever thread, restores what that first guard saved. While any
//! guard is active the fault signals stay routed to the dispatcher, so
//! guarded calls may run concurrently on several threads.
//!
//! A guard that finds a fault signal re-routed since the dispatcher went in
//! (someone installed a handler inside a guarded call) installs the
//! dispatcher again and puts the displaced handler back when it exits.
//! Guarded calls nested on one thread therefore each leave the table as
//! they found it.

use std::cell::Cell;
use std::ffi::c_void;
use std::fmt;
use std::ptr;

use parking_lot::Mutex;

use crate::error::{LayerError, Result};
use crate::native::{self, SignalDisposition};
use crate::signal::signal_name;

/// Called with the frame's user pointer when a fault hits a guarded call.
pub type FaultHandler = extern "C" fn(*mut c_void);

/// Signals intercepted during a guarded call.
pub const FAULT_SIGNALS: [libc::c_int; 5] = [
    libc::SIGILL,
    libc::SIGFPE,
    libc::SIGSEGV,
    libc::SIGBUS,
    libc::SIGTRAP,
];

// ---------------------------------------------------------------------------
// Per-thread chain
// ---------------------------------------------------------------------------

struct ChainFrame {
    fail_handler: Option<FaultHandler>,
    user_ptr: *mut c_void,
    next: Cell<*const ChainFrame>,
}

thread_local! {
    static CHAIN_HEAD: Cell<*const ChainFrame> = const { Cell::new(ptr::null()) };
}

fn chain_head() -> *const ChainFrame {
    CHAIN_HEAD.try_with(Cell::get).unwrap_or(ptr::null())
}

/// Number of guarded calls active on the calling thread.
#[must_use]
pub fn chain_depth() -> usize {
    let mut depth = 0;
    let mut cursor = chain_head();
    while !cursor.is_null() {
        depth += 1;
        // SAFETY: frames on this thread's chain are owned by live guards on
        // this thread; a guard unlinks its frame before freeing it.
        cursor = unsafe { (*cursor).next.get() };
    }
    depth
}

/// Handler and user pointer of the innermost frame on the calling thread.
#[must_use]
pub fn innermost_handler() -> Option<(Option<FaultHandler>, *mut c_void)> {
    let head = chain_head();
    if head.is_null() {
        return None;
    }
    // SAFETY: see `chain_depth`.
    let frame = unsafe { &*head };
    Some((frame.fail_handler, frame.user_ptr))
}

// ---------------------------------------------------------------------------
// Process-wide trap table
// ---------------------------------------------------------------------------

struct TrapTable {
    active: usize,
    saved: Vec<SignalDisposition>,
}

static TRAPS: Mutex<TrapTable> = parking_lot::const_mutex(TrapTable {
    active: 0,
    saved: Vec::new(),
});

fn routed_to_dispatcher(disposition: &SignalDisposition) -> bool {
    disposition.handler_address() == fault_dispatch as usize
}

/// Route every fault signal to the dispatcher for one more guard.
///
/// Returns the dispositions this guard displaced that are not recorded in
/// the table; the guard restores them itself on exit.
fn install_traps() -> Result<Vec<SignalDisposition>> {
    let mut table = TRAPS.lock();
    let first = table.active == 0;
    let mut displaced = Vec::new();
    for signum in FAULT_SIGNALS {
        let installed = if first {
            SignalDisposition::install(signum, fault_dispatch)
        } else {
            match SignalDisposition::query(signum) {
                Ok(current) if routed_to_dispatcher(&current) => continue,
                Ok(_) => SignalDisposition::install(signum, fault_dispatch),
                Err(errno) => Err(errno),
            }
        };
        match installed {
            Ok(previous) => displaced.push(previous),
            Err(errno) => {
                let _ = restore_all(&displaced);
                return Err(LayerError::Signal { signum, errno });
            }
        }
    }
    if first {
        table.saved = std::mem::take(&mut displaced);
        tracing::debug!(signals = FAULT_SIGNALS.len(), "fault traps installed");
    } else if !displaced.is_empty() {
        tracing::debug!(signals = displaced.len(), "fault traps reclaimed");
    }
    table.active += 1;
    Ok(displaced)
}

fn remove_traps(displaced: &[SignalDisposition]) -> Result<()> {
    let mut table = TRAPS.lock();
    table.active = table.active.saturating_sub(1);
    let restored = restore_all(displaced);
    if table.active > 0 {
        return restored;
    }
    let saved = std::mem::take(&mut table.saved);
    let reset = restore_all(&saved);
    tracing::debug!("fault traps restored");
    restored.and(reset)
}

/// Reinstate `dispositions` newest first, reporting the first failure.
fn restore_all(dispositions: &[SignalDisposition]) -> Result<()> {
    let mut first_err = None;
    for previous in dispositions.iter().rev() {
        if let Err(errno) = previous.restore() {
            first_err.get_or_insert(LayerError::Signal {
                signum: previous.signum(),
                errno,
            });
        }
    }
    first_err.map_or(Ok(()), Err)
}

/// Current dispositions of [`FAULT_SIGNALS`], in order.
///
/// # Errors
///
/// [`LayerError::Signal`] if a disposition cannot be queried.
pub fn fault_dispositions() -> Result<Vec<SignalDisposition>> {
    FAULT_SIGNALS
        .iter()
        .map(|&signum| {
            SignalDisposition::query(signum).map_err(|errno| LayerError::Signal { signum, errno })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Fault dispatch (signal context)
// ---------------------------------------------------------------------------

/// Only async-signal-safe work below: no allocation, no locks, no tracing.
extern "C" fn fault_dispatch(signum: libc::c_int) {
    native::write_stderr_raw(b"oslayer: fatal ");
    native::write_stderr_raw(signal_name(signum).as_bytes());
    native::write_stderr_raw(b" during guarded call\n");
    if let Some((Some(fail_handler), user_ptr)) = innermost_handler() {
        fail_handler(user_ptr);
    }
    native::abort_process()
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// An active guarded region on the current thread.
///
/// Dropping the guard puts back any handler it displaced, restores the
/// saved fault dispositions if it was the last active guard in the process,
/// and then unlinks its frame. Not `Send`: the
/// frame belongs to the thread that entered it.
pub struct SafeCallGuard {
    frame: Box<ChainFrame>,
    displaced: Vec<SignalDisposition>,
    exited: bool,
}

impl SafeCallGuard {
    /// Push a frame for `fail_handler` and install the fault traps.
    ///
    /// # Errors
    ///
    /// [`LayerError::Signal`] if the traps cannot be installed; the frame is
    /// unlinked again before returning.
    pub fn enter(fail_handler: Option<FaultHandler>, user_ptr: *mut c_void) -> Result<Self> {
        let frame = Box::new(ChainFrame {
            fail_handler,
            user_ptr,
            next: Cell::new(chain_head()),
        });
        CHAIN_HEAD.with(|head| head.set(&*frame));
        let mut guard = Self {
            frame,
            displaced: Vec::new(),
            exited: false,
        };
        match install_traps() {
            Ok(displaced) => {
                guard.displaced = displaced;
                Ok(guard)
            }
            Err(err) => {
                guard.exited = true;
                guard.unlink();
                Err(err)
            }
        }
    }

    /// Leave the guarded region, reporting a failure to restore the traps.
    ///
    /// # Errors
    ///
    /// [`LayerError::Signal`] if a saved disposition cannot be reinstated.
    pub fn exit(mut self) -> Result<()> {
        self.leave()
    }

    fn leave(&mut self) -> Result<()> {
        if self.exited {
            return Ok(());
        }
        self.exited = true;
        let restored = remove_traps(&std::mem::take(&mut self.displaced));
        self.unlink();
        restored
    }

    /// Remove this frame from the chain, even when inner guards were
    /// dropped out of order.
    fn unlink(&self) {
        let me: *const ChainFrame = &*self.frame;
        let head = chain_head();
        if head == me {
            CHAIN_HEAD.with(|head| head.set(self.frame.next.get()));
            return;
        }
        tracing::warn!("guarded call exited out of order");
        let mut cursor = head;
        while !cursor.is_null() {
            // SAFETY: see `chain_depth`.
            let frame = unsafe { &*cursor };
            if frame.next.get() == me {
                frame.next.set(self.frame.next.get());
                return;
            }
            cursor = frame.next.get();
        }
    }
}

impl Drop for SafeCallGuard {
    fn drop(&mut self) {
        if let Err(err) = self.leave() {
            tracing::error!(%err, "could not restore fault dispositions");
        }
    }
}

impl fmt::Debug for SafeCallGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeCallGuard")
            .field("has_fail_handler", &self.frame.fail_handler.is_some())
            .field("exited", &self.exited)
            .finish()
    }
}

/// Run `func` under fault protection.
///
/// A hardware fault while `func` runs invokes `fail_handler(user_ptr)` and
/// aborts the process. When `func` returns (or unwinds) the dispositions are
/// restored and the frame is popped.
///
/// # Errors
///
/// [`LayerError::Signal`] if the traps cannot be installed or restored.
pub fn safe_call<R>(
    func: impl FnOnce() -> R,
    fail_handler: Option<FaultHandler>,
    user_ptr: *mut c_void,
) -> Result<R> {
    let guard = SafeCallGuard::enter(fail_handler, user_ptr)?;
    let output = func();
    guard.exit()?;
    Ok(output)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
