//! Condition-variable entities.
//!
//! Waits take an absolute deadline in monotonic microseconds (`endt_us`,
//! see [`crate::time::now_microseconds`]); [`NO_DEADLINE`] waits forever.
//! A wait returns `Ok(true)` when woken and `Ok(false)` when the deadline
//! passed. Wakeups may be spurious, so callers re-check their predicate.
//!
//! The caller's lock is released by exactly one level for the duration of
//! the wait and re-acquired in the same mode before returning, including
//! when the native wait fails.
//!
//! [`NO_DEADLINE`]: crate::time::NO_DEADLINE

use std::cell::Cell;
use std::sync::Arc;

use super::{HoldMode, native_err};
use crate::entity::{EntityKind, EntityPool, Handle, Payload};
use crate::error::{LayerError, Result};
use crate::native::NativeCondvar;
use crate::time::Deadline;

impl EntityPool {
    /// Allocate a condition variable. [`Handle::NULL`] if the native
    /// primitive cannot be created.
    pub fn condition_variable_alloc(&self) -> Handle {
        self.allocate_with(EntityKind::ConditionVariable, || {
            NativeCondvar::new().map(|cv| Payload::ConditionVariable(Arc::new(cv)))
        })
    }

    /// # Errors
    ///
    /// Fails if `handle` does not name a live condition variable.
    pub fn condition_variable_release(&self, handle: Handle) -> Result<()> {
        self.release_kind(handle, EntityKind::ConditionVariable)
    }

    /// Wait on `cv` while holding the recursive mutex `mutex`.
    ///
    /// # Errors
    ///
    /// Fails for stale or mistyped handles, when the caller does not hold
    /// `mutex`, or when a native call fails.
    pub fn condition_variable_wait(&self, cv: Handle, mutex: Handle, endt_us: u64) -> Result<bool> {
        let condvar = self.condvar_primitive(cv)?;
        let mutex = self.mutex_primitive(mutex)?;
        wait_on(
            &condvar,
            Deadline::from_end_us(endt_us),
            || mutex.unlock().map_err(native_err("pthread_mutex_unlock")),
            || mutex.lock().map_err(native_err("pthread_mutex_lock")),
        )
    }

    /// Wait on `cv` while holding `rw` shared.
    ///
    /// # Errors
    ///
    /// See [`condition_variable_wait`](Self::condition_variable_wait).
    pub fn condition_variable_wait_rw_r(&self, cv: Handle, rw: Handle, endt_us: u64) -> Result<bool> {
        self.condition_variable_wait_rw(cv, rw, HoldMode::Shared, endt_us)
    }

    /// Wait on `cv` while holding `rw` exclusively.
    ///
    /// # Errors
    ///
    /// See [`condition_variable_wait`](Self::condition_variable_wait).
    pub fn condition_variable_wait_rw_w(&self, cv: Handle, rw: Handle, endt_us: u64) -> Result<bool> {
        self.condition_variable_wait_rw(cv, rw, HoldMode::Exclusive, endt_us)
    }

    fn condition_variable_wait_rw(
        &self,
        cv: Handle,
        rw: Handle,
        mode: HoldMode,
        endt_us: u64,
    ) -> Result<bool> {
        let condvar = self.condvar_primitive(cv)?;
        let lock = self.rw_primitive(rw)?;
        wait_on(
            &condvar,
            Deadline::from_end_us(endt_us),
            || lock.unlock().map_err(native_err("pthread_rwlock_unlock")),
            || match mode {
                HoldMode::Shared => lock.read_lock().map_err(native_err("pthread_rwlock_rdlock")),
                HoldMode::Exclusive => lock.write_lock().map_err(native_err("pthread_rwlock_wrlock")),
            },
        )
    }

    /// Wake at least one waiter.
    ///
    /// # Errors
    ///
    /// Fails if `cv` does not name a live condition variable.
    pub fn condition_variable_signal(&self, cv: Handle) -> Result<()> {
        self.condvar_primitive(cv)?
            .signal()
            .map_err(native_err("pthread_cond_signal"))
    }

    /// Wake every waiter.
    ///
    /// # Errors
    ///
    /// Fails if `cv` does not name a live condition variable.
    pub fn condition_variable_broadcast(&self, cv: Handle) -> Result<()> {
        self.condvar_primitive(cv)?
            .broadcast()
            .map_err(native_err("pthread_cond_broadcast"))
    }

    fn condvar_primitive(&self, handle: Handle) -> Result<Arc<NativeCondvar>> {
        let slot = self.resolve(handle, EntityKind::ConditionVariable)?;
        match &*slot.payload.read() {
            Payload::ConditionVariable(cv) => Ok(Arc::clone(cv)),
            _ => Err(LayerError::Uninitialized {
                kind: EntityKind::ConditionVariable,
            }),
        }
    }
}

fn wait_on(
    condvar: &NativeCondvar,
    deadline: Deadline,
    release: impl FnOnce() -> Result<()>,
    reacquire: impl FnOnce() -> Result<()>,
) -> Result<bool> {
    let released = Cell::new(None);
    let outcome = condvar.wait_releasing(
        || match release() {
            Ok(()) => {
                released.set(Some(Ok(())));
                Ok(())
            }
            Err(err) => {
                let errno = err.errno();
                released.set(Some(Err(err)));
                Err(errno)
            }
        },
        deadline.remaining(),
    );
    match released.into_inner() {
        Some(Ok(())) => {
            reacquire()?;
            outcome.map_err(native_err("pthread_cond_wait"))
        }
        Some(Err(err)) => Err(err),
        // The gate could not be taken; the caller's lock was never dropped.
        None => outcome.map_err(native_err("pthread_mutex_lock")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{NO_DEADLINE, now_microseconds};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn timed_wait_reports_timeout_and_relocks() {
        let pool = EntityPool::new(4);
        let cv = pool.condition_variable_alloc();
        let mutex = pool.mutex_alloc();
        pool.mutex_take(mutex).unwrap();
        let start = now_microseconds();
        let woken = pool
            .condition_variable_wait(cv, mutex, start + 20_000)
            .unwrap();
        assert!(!woken);
        assert!(now_microseconds() - start >= 15_000);
        // Still held: the recursive unlock succeeds exactly once.
        pool.mutex_drop(mutex).unwrap();
        assert!(pool.mutex_drop(mutex).is_err());
    }

    #[test]
    fn past_deadline_returns_immediately() {
        let pool = EntityPool::new(4);
        let cv = pool.condition_variable_alloc();
        let mutex = pool.mutex_alloc();
        pool.mutex_take(mutex).unwrap();
        assert!(!pool.condition_variable_wait(cv, mutex, 0).unwrap());
        pool.mutex_drop(mutex).unwrap();
    }

    #[test]
    fn wait_without_holding_the_mutex_fails() {
        let pool = EntityPool::new(4);
        let cv = pool.condition_variable_alloc();
        let mutex = pool.mutex_alloc();
        assert!(matches!(
            pool.condition_variable_wait(cv, mutex, NO_DEADLINE),
            Err(LayerError::Native {
                op: "pthread_mutex_unlock",
                ..
            })
        ));
    }

    #[test]
    fn signal_wakes_a_waiter_holding_a_recursive_mutex() {
        let pool = Arc::new(EntityPool::new(4));
        let cv = pool.condition_variable_alloc();
        let mutex = pool.mutex_alloc();
        let ready = Arc::new(AtomicBool::new(false));

        let waiter = {
            let (pool, ready) = (Arc::clone(&pool), Arc::clone(&ready));
            std::thread::spawn(move || {
                pool.mutex_take(mutex).unwrap();
                while !ready.load(Ordering::Acquire) {
                    pool.condition_variable_wait(cv, mutex, NO_DEADLINE)
                        .unwrap();
                }
                pool.mutex_drop(mutex).unwrap();
            })
        };

        pool.mutex_take(mutex).unwrap();
        ready.store(true, Ordering::Release);
        pool.mutex_drop(mutex).unwrap();
        pool.condition_variable_signal(cv).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn broadcast_wakes_shared_and_exclusive_waiters() {
        let pool = Arc::new(EntityPool::new(4));
        let cv = pool.condition_variable_alloc();
        let rw = pool.rw_mutex_alloc();
        let ready = Arc::new(AtomicBool::new(false));
        let woken = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = [HoldMode::Shared, HoldMode::Shared, HoldMode::Exclusive]
            .into_iter()
            .map(|mode| {
                let (pool, ready, woken) =
                    (Arc::clone(&pool), Arc::clone(&ready), Arc::clone(&woken));
                std::thread::spawn(move || {
                    pool.rw_mutex_take(rw, mode).unwrap();
                    while !ready.load(Ordering::Acquire) {
                        let deadline = now_microseconds() + 50_000;
                        match mode {
                            HoldMode::Shared => pool.condition_variable_wait_rw_r(cv, rw, deadline),
                            HoldMode::Exclusive => {
                                pool.condition_variable_wait_rw_w(cv, rw, deadline)
                            }
                        }
                        .unwrap();
                    }
                    woken.fetch_add(1, Ordering::SeqCst);
                    pool.rw_mutex_drop(rw, mode).unwrap();
                })
            })
            .collect();

        std::thread::sleep(std::time::Duration::from_millis(10));
        pool.rw_mutex_take_w(rw).unwrap();
        ready.store(true, Ordering::Release);
        pool.rw_mutex_drop_w(rw).unwrap();
        pool.condition_variable_broadcast(cv).unwrap();
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(woken.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn release_returns_entity() {
        let pool = EntityPool::new(2);
        let cv = pool.condition_variable_alloc();
        pool.condition_variable_release(cv).unwrap();
        assert!(matches!(
            pool.condition_variable_signal(cv),
            Err(LayerError::StaleHandle { .. })
        ));
        assert!(pool.stats().is_conserved());
    }
}
