//! pthread mutex, rwlock and condition variable wrappers.

use std::cell::UnsafeCell;
use std::ptr;
use std::time::Duration;

use super::{check, clock};

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

/// A pthread mutex at a fixed heap address.
pub struct NativeMutex {
    raw: Box<UnsafeCell<libc::pthread_mutex_t>>,
}

// SAFETY: pthread mutexes are designed to be shared between threads; the
// boxed storage never moves while the wrapper is alive.
unsafe impl Send for NativeMutex {}
// SAFETY: see above; all access goes through the pthread API.
unsafe impl Sync for NativeMutex {}

impl NativeMutex {
    /// A mutex the owning thread may lock again without deadlocking.
    pub fn recursive() -> Result<Self, i32> {
        Self::with_type(libc::PTHREAD_MUTEX_RECURSIVE)
    }

    /// A default (non-recursive) mutex.
    pub fn plain() -> Result<Self, i32> {
        Self::with_type(libc::PTHREAD_MUTEX_NORMAL)
    }

    fn with_type(kind: libc::c_int) -> Result<Self, i32> {
        // SAFETY: all-zero is a valid bit pattern for the opaque pthread
        // structs; they are initialized below before any other use.
        let raw = Box::new(UnsafeCell::new(unsafe {
            std::mem::zeroed::<libc::pthread_mutex_t>()
        }));
        // SAFETY: as above.
        let mut attr: libc::pthread_mutexattr_t = unsafe { std::mem::zeroed() };
        // SAFETY: `attr` is a valid out-pointer.
        check(unsafe { libc::pthread_mutexattr_init(&mut attr) })?;
        // SAFETY: `attr` was initialized above.
        let mut rc = unsafe { libc::pthread_mutexattr_settype(&mut attr, kind) };
        if rc == 0 {
            // SAFETY: `raw` points at writable storage that outlives the
            // mutex; `attr` is initialized.
            rc = unsafe { libc::pthread_mutex_init(raw.get(), &attr) };
        }
        // SAFETY: `attr` was initialized above and is not used afterwards.
        unsafe { libc::pthread_mutexattr_destroy(&mut attr) };
        check(rc)?;
        Ok(Self { raw })
    }

    pub fn lock(&self) -> Result<(), i32> {
        // SAFETY: the mutex was initialized in the constructor.
        check(unsafe { libc::pthread_mutex_lock(self.raw.get()) })
    }

    pub fn unlock(&self) -> Result<(), i32> {
        // SAFETY: the mutex was initialized in the constructor.
        check(unsafe { libc::pthread_mutex_unlock(self.raw.get()) })
    }

    #[inline]
    fn as_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.raw.get()
    }
}

impl Drop for NativeMutex {
    fn drop(&mut self) {
        // SAFETY: initialized in the constructor; no other reference remains.
        unsafe { libc::pthread_mutex_destroy(self.raw.get()) };
    }
}

// ---------------------------------------------------------------------------
// Reader/writer lock
// ---------------------------------------------------------------------------

/// A pthread rwlock at a fixed heap address.
pub struct NativeRwLock {
    raw: Box<UnsafeCell<libc::pthread_rwlock_t>>,
}

// SAFETY: pthread rwlocks are designed to be shared between threads.
unsafe impl Send for NativeRwLock {}
// SAFETY: see above.
unsafe impl Sync for NativeRwLock {}

impl NativeRwLock {
    pub fn new() -> Result<Self, i32> {
        // SAFETY: zeroed storage is initialized immediately below.
        let raw = Box::new(UnsafeCell::new(unsafe {
            std::mem::zeroed::<libc::pthread_rwlock_t>()
        }));
        // SAFETY: `raw` points at writable storage; null selects default attributes.
        check(unsafe { libc::pthread_rwlock_init(raw.get(), ptr::null()) })?;
        Ok(Self { raw })
    }

    pub fn read_lock(&self) -> Result<(), i32> {
        // SAFETY: initialized in the constructor.
        check(unsafe { libc::pthread_rwlock_rdlock(self.raw.get()) })
    }

    pub fn write_lock(&self) -> Result<(), i32> {
        // SAFETY: initialized in the constructor.
        check(unsafe { libc::pthread_rwlock_wrlock(self.raw.get()) })
    }

    /// Release one hold, shared or exclusive.
    pub fn unlock(&self) -> Result<(), i32> {
        // SAFETY: initialized in the constructor.
        check(unsafe { libc::pthread_rwlock_unlock(self.raw.get()) })
    }
}

impl Drop for NativeRwLock {
    fn drop(&mut self) {
        // SAFETY: initialized in the constructor; no other reference remains.
        unsafe { libc::pthread_rwlock_destroy(self.raw.get()) };
    }
}

// ---------------------------------------------------------------------------
// Condition variable
// ---------------------------------------------------------------------------

/// A pthread condition variable paired with its own gate mutex.
///
/// Waiters take the gate before giving up the caller's lock, and signalers
/// take the gate before signalling, so a wakeup sent after the caller's lock
/// is released can never fall between "unlock" and "start waiting". This
/// lets one condition variable serve recursive mutexes and both hold modes
/// of a reader/writer mutex.
pub struct NativeCondvar {
    cond: Box<UnsafeCell<libc::pthread_cond_t>>,
    gate: NativeMutex,
}

// SAFETY: pthread condition variables are designed to be shared.
unsafe impl Send for NativeCondvar {}
// SAFETY: see above.
unsafe impl Sync for NativeCondvar {}

impl NativeCondvar {
    pub fn new() -> Result<Self, i32> {
        let gate = NativeMutex::plain()?;
        // SAFETY: zeroed storage is initialized immediately below.
        let cond = Box::new(UnsafeCell::new(unsafe {
            std::mem::zeroed::<libc::pthread_cond_t>()
        }));
        // SAFETY: zeroed storage is initialized by pthread_condattr_init.
        let mut attr: libc::pthread_condattr_t = unsafe { std::mem::zeroed() };
        // SAFETY: `attr` is valid writable storage.
        check(unsafe { libc::pthread_condattr_init(&mut attr) })?;
        let rc = bind_clock(&mut attr).and_then(|()| {
            // SAFETY: `cond` points at writable storage; `attr` is initialized.
            check(unsafe { libc::pthread_cond_init(cond.get(), &attr) })
        });
        // SAFETY: `attr` was initialized above and is no longer needed.
        unsafe { libc::pthread_condattr_destroy(&mut attr) };
        rc?;
        Ok(Self { cond, gate })
    }

    /// Release the caller's lock through `release`, then block until
    /// signalled or until `timeout` elapses.
    ///
    /// Returns `Ok(true)` when woken and `Ok(false)` on timeout. The caller
    /// re-acquires its own lock afterwards, in whichever mode it held it.
    /// Spurious wakeups are possible.
    pub fn wait_releasing(
        &self,
        release: impl FnOnce() -> Result<(), i32>,
        timeout: Option<Duration>,
    ) -> Result<bool, i32> {
        self.gate.lock()?;
        if let Err(errno) = release() {
            let _ = self.gate.unlock();
            return Err(errno);
        }
        let rc = match timeout {
            // SAFETY: both objects are initialized and the gate is held by
            // this thread, as pthread_cond_wait requires.
            None => unsafe { libc::pthread_cond_wait(self.cond.get(), self.gate.as_ptr()) },
            Some(timeout) => {
                let abstime = clock::condvar_deadline(timeout);
                // SAFETY: as above; `abstime` is a valid timespec.
                unsafe {
                    libc::pthread_cond_timedwait(self.cond.get(), self.gate.as_ptr(), &abstime)
                }
            }
        };
        self.gate.unlock()?;
        match rc {
            0 => Ok(true),
            libc::ETIMEDOUT => Ok(false),
            errno => Err(errno),
        }
    }

    /// Wake at least one waiter, if any.
    pub fn signal(&self) -> Result<(), i32> {
        self.gate.lock()?;
        // SAFETY: initialized in the constructor.
        let rc = unsafe { libc::pthread_cond_signal(self.cond.get()) };
        self.gate.unlock()?;
        check(rc)
    }

    /// Wake every waiter.
    pub fn broadcast(&self) -> Result<(), i32> {
        self.gate.lock()?;
        // SAFETY: initialized in the constructor.
        let rc = unsafe { libc::pthread_cond_broadcast(self.cond.get()) };
        self.gate.unlock()?;
        check(rc)
    }
}

/// Measure timed waits on [`clock::CONDVAR_CLOCK`].
#[cfg(target_os = "linux")]
fn bind_clock(attr: &mut libc::pthread_condattr_t) -> Result<(), i32> {
    // SAFETY: `attr` is an initialized condition-variable attribute object.
    check(unsafe { libc::pthread_condattr_setclock(attr, clock::CONDVAR_CLOCK) })
}

#[cfg(not(target_os = "linux"))]
fn bind_clock(_attr: &mut libc::pthread_condattr_t) -> Result<(), i32> {
    Ok(())
}

impl Drop for NativeCondvar {
    fn drop(&mut self) {
        // SAFETY: initialized in the constructor; no other reference remains.
        unsafe { libc::pthread_cond_destroy(self.cond.get()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn recursive_mutex_nests_on_one_thread() {
        let mutex = NativeMutex::recursive().unwrap();
        mutex.lock().unwrap();
        mutex.lock().unwrap();
        mutex.unlock().unwrap();
        mutex.unlock().unwrap();
    }

    #[test]
    fn rwlock_admits_multiple_readers() {
        let lock = NativeRwLock::new().unwrap();
        lock.read_lock().unwrap();
        lock.read_lock().unwrap();
        lock.unlock().unwrap();
        lock.unlock().unwrap();
        lock.write_lock().unwrap();
        lock.unlock().unwrap();
    }

    #[test]
    fn timed_wait_expires() {
        let mutex = NativeMutex::recursive().unwrap();
        let cv = NativeCondvar::new().unwrap();
        mutex.lock().unwrap();
        let woken = cv
            .wait_releasing(|| mutex.unlock(), Some(Duration::from_millis(20)))
            .unwrap();
        assert!(!woken);
    }

    #[test]
    fn signal_wakes_waiter() {
        let mutex = Arc::new(NativeMutex::recursive().unwrap());
        let cv = Arc::new(NativeCondvar::new().unwrap());
        let ready = Arc::new(AtomicBool::new(false));

        let waiter = {
            let (mutex, cv, ready) = (Arc::clone(&mutex), Arc::clone(&cv), Arc::clone(&ready));
            std::thread::spawn(move || {
                mutex.lock().unwrap();
                while !ready.load(Ordering::Acquire) {
                    cv.wait_releasing(|| mutex.unlock(), Some(Duration::from_secs(5)))
                        .unwrap();
                    mutex.lock().unwrap();
                }
                mutex.unlock().unwrap();
            })
        };

        mutex.lock().unwrap();
        ready.store(true, Ordering::Release);
        mutex.unlock().unwrap();
        cv.broadcast().unwrap();
        waiter.join().unwrap();
    }
}
