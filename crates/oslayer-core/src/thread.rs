//! Thread lifecycle.
//!
//! A launched thread is bound to a `Thread` entity with two owners: the
//! handle returned to the caller and the trampoline running on the new
//! thread. Each owner clears its own bit of the entity's reference mask with
//! one atomic `fetch_and`; whichever clear observes the other bit already
//! gone returns the entity to the pool. The order of the two clears does not
//! matter and the entity is released exactly once.
//!
//! ```text
//! Allocated(0b11) --trampoline done--> 0b01 --handle released--> 0b00 => release
//! Allocated(0b11) --handle released--> 0b10 --trampoline done--> 0b00 => release
//! ```

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::entity::{EntityKind, EntityPool, Handle, Payload};
use crate::error::{LayerError, Result};
use crate::native;

// ---------------------------------------------------------------------------
// Reference mask
// ---------------------------------------------------------------------------

/// One of the two finalizing owners of a thread entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Owner {
    /// The handle returned by [`EntityPool::launch_thread`].
    Handle = 0b01,
    /// The trampoline running the thread function.
    Trampoline = 0b10,
}

impl Owner {
    #[inline]
    const fn bit(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Handle => "handle",
            Self::Trampoline => "trampoline",
        })
    }
}

/// Outcome of clearing one owner bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalize {
    /// The caller cleared the last bit and must release the entity.
    Last,
    /// The other owner is still outstanding.
    Outstanding,
}

/// Two-owner finalization bits of a thread entity.
#[derive(Debug, Default)]
pub struct ReferenceMask(AtomicU32);

impl ReferenceMask {
    /// Both owners live.
    pub const ARMED: u32 = Owner::Handle.bit() | Owner::Trampoline.bit();

    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Give the entity both owners. Only done right after allocation.
    pub fn arm(&self) {
        self.0.store(Self::ARMED, Ordering::Release);
    }

    /// Clear `owner`'s bit.
    ///
    /// The clear and the check of the other bit are one `fetch_and` with
    /// `AcqRel` ordering, so of two racing owners exactly one sees `Last`.
    ///
    /// # Errors
    ///
    /// [`LayerError::OwnerAlreadyReleased`] if the bit was already clear.
    pub fn release(&self, owner: Owner) -> Result<Finalize> {
        let bit = owner.bit();
        let previous = self.0.fetch_and(!bit, Ordering::AcqRel);
        if previous & bit == 0 {
            return Err(LayerError::OwnerAlreadyReleased { owner });
        }
        if previous & !bit == 0 {
            Ok(Finalize::Last)
        } else {
            Ok(Finalize::Outstanding)
        }
    }

    #[must_use]
    pub fn bits(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Launch / release
// ---------------------------------------------------------------------------

/// Native side of a thread entity.
pub(crate) struct ThreadBinding {
    pub(crate) thread: std::thread::Thread,
}

thread_local! {
    static CURRENT_HANDLE: Cell<Handle> = const { Cell::new(Handle::NULL) };
}

/// Handle of the calling thread's entity, or [`Handle::NULL`] on threads not
/// started through [`EntityPool::launch_thread`].
#[must_use]
pub fn current_thread_handle() -> Handle {
    CURRENT_HANDLE.with(Cell::get)
}

/// Kernel thread id of the calling thread.
#[must_use]
pub fn current_thread_id() -> i64 {
    native::current_tid()
}

/// Clears the trampoline bit when the thread function returns or unwinds.
struct TrampolineOwner<'a> {
    pool: &'a EntityPool,
    handle: Handle,
}

impl Drop for TrampolineOwner<'_> {
    fn drop(&mut self) {
        CURRENT_HANDLE.with(|current| current.set(Handle::NULL));
        tracing::debug!(handle = %self.handle, "thread function finished");
        if let Err(err) = self.pool.finalize_owner(self.handle, Owner::Trampoline) {
            tracing::error!(handle = %self.handle, %err, "trampoline could not finalize thread entity");
        }
    }
}

fn trampoline(pool: &EntityPool, handle: Handle, f: impl FnOnce()) {
    CURRENT_HANDLE.with(|current| current.set(handle));
    let _owner = TrampolineOwner { pool, handle };
    f();
}

impl EntityPool {
    /// Start `f` on a new native thread bound to a fresh `Thread` entity.
    ///
    /// Returns [`Handle::NULL`] when the native thread cannot be created; the
    /// entity is returned to the pool before this returns. Pool exhaustion
    /// aborts the process.
    pub fn launch_thread<F>(self: &Arc<Self>, f: F) -> Handle
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.allocate(EntityKind::Thread);
        let slot = match self.live_slot(handle) {
            Ok(slot) => slot,
            Err(err) => {
                tracing::error!(%handle, %err, "freshly allocated thread entity is not live");
                return Handle::NULL;
            }
        };
        slot.reference_mask.arm();

        let mut builder = std::thread::Builder::new();
        if let Some(prefix) = &self.config().thread_name_prefix {
            let index = handle.index().unwrap_or_default();
            builder = builder.name(format!("{prefix}-{index}"));
        }
        if let Some(stack_size) = self.config().thread_stack_size {
            builder = builder.stack_size(stack_size);
        }

        let pool = Arc::clone(self);
        match builder.spawn(move || trampoline(&pool, handle, f)) {
            Ok(join) => {
                // The caller has not seen the handle yet, so the entity cannot
                // be released before the binding is attached.
                slot.set_payload(Payload::Thread(ThreadBinding {
                    thread: join.thread().clone(),
                }));
                tracing::debug!(%handle, "thread launched");
                handle
            }
            Err(io_err) => {
                let err = LayerError::Spawn {
                    reason: io_err.to_string(),
                };
                tracing::warn!(%handle, %err, "thread launch failed");
                if let Err(release_err) = self.release(handle) {
                    tracing::error!(%handle, %release_err, "could not return thread entity");
                }
                Handle::NULL
            }
        }
    }

    /// Give up the caller's ownership of a launched thread.
    ///
    /// Does not wait for the thread. If the thread function already returned,
    /// the entity goes back to the pool now; otherwise the trampoline
    /// releases it when the function returns.
    ///
    /// # Errors
    ///
    /// [`LayerError::StaleHandle`] or [`LayerError::KindMismatch`] for a
    /// handle that does not name a live thread entity, and
    /// [`LayerError::OwnerAlreadyReleased`] when the handle was already
    /// released while the thread is still running.
    pub fn release_thread_handle(&self, handle: Handle) -> Result<()> {
        self.finalize_owner(handle, Owner::Handle)
    }

    /// Whether the thread function behind `handle` has not returned yet.
    ///
    /// # Errors
    ///
    /// Fails for handles that do not name a live thread entity.
    pub fn thread_is_running(&self, handle: Handle) -> Result<bool> {
        let slot = self.resolve(handle, EntityKind::Thread)?;
        Ok(slot.reference_mask.bits() & Owner::Trampoline.bit() != 0)
    }

    /// The std thread bound to a live thread entity.
    ///
    /// # Errors
    ///
    /// Fails for handles that do not name a live thread entity, or
    /// [`LayerError::Uninitialized`] during the window between spawn and
    /// binding.
    pub fn thread_of(&self, handle: Handle) -> Result<std::thread::Thread> {
        let slot = self.resolve(handle, EntityKind::Thread)?;
        match &*slot.payload.read() {
            Payload::Thread(binding) => Ok(binding.thread.clone()),
            _ => Err(LayerError::Uninitialized {
                kind: EntityKind::Thread,
            }),
        }
    }

    fn finalize_owner(&self, handle: Handle, owner: Owner) -> Result<()> {
        let slot = self.resolve(handle, EntityKind::Thread)?;
        match slot.reference_mask.release(owner)? {
            Finalize::Last => {
                tracing::debug!(%handle, %owner, "last owner released thread entity");
                self.release(handle)
            }
            Finalize::Outstanding => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayerConfig;
    use std::sync::Barrier;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
        let start = Instant::now();
        while !done() {
            assert!(
                start.elapsed() < Duration::from_secs(10),
                "timed out waiting for {what}"
            );
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn mask_release_orders() {
        let mask = ReferenceMask::new();
        mask.arm();
        assert_eq!(mask.release(Owner::Handle), Ok(Finalize::Outstanding));
        assert_eq!(mask.release(Owner::Trampoline), Ok(Finalize::Last));
        assert_eq!(mask.bits(), 0);

        mask.arm();
        assert_eq!(mask.release(Owner::Trampoline), Ok(Finalize::Outstanding));
        assert_eq!(mask.release(Owner::Handle), Ok(Finalize::Last));
    }

    #[test]
    fn mask_rejects_second_clear_of_one_bit() {
        let mask = ReferenceMask::new();
        mask.arm();
        mask.release(Owner::Handle).unwrap();
        assert_eq!(
            mask.release(Owner::Handle),
            Err(LayerError::OwnerAlreadyReleased {
                owner: Owner::Handle
            })
        );
        assert_eq!(mask.bits(), Owner::Trampoline as u32);
    }

    #[test]
    fn racing_owners_finalize_once() {
        for _ in 0..200 {
            let mask = Arc::new(ReferenceMask::new());
            mask.arm();
            let barrier = Arc::new(Barrier::new(2));
            let other = {
                let (mask, barrier) = (Arc::clone(&mask), Arc::clone(&barrier));
                std::thread::spawn(move || {
                    barrier.wait();
                    mask.release(Owner::Trampoline).unwrap()
                })
            };
            barrier.wait();
            let mine = mask.release(Owner::Handle).unwrap();
            let theirs = other.join().unwrap();
            let lasts = [mine, theirs]
                .iter()
                .filter(|&&f| f == Finalize::Last)
                .count();
            assert_eq!(lasts, 1);
        }
    }

    #[test]
    fn handle_released_after_thread_finishes() {
        let pool = Arc::new(EntityPool::new(4));
        let (tx, rx) = mpsc::channel();
        let handle = pool.launch_thread(move || tx.send(()).unwrap());
        assert!(!handle.is_null());
        rx.recv().unwrap();
        wait_until("trampoline exit", || !pool.thread_is_running(handle).unwrap());

        // Trampoline is gone but the handle is outstanding.
        assert_eq!(pool.kind_of(handle), Some(EntityKind::Thread));
        pool.release_thread_handle(handle).unwrap();
        assert_eq!(pool.kind_of(handle), None);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn handle_released_while_thread_runs() {
        let pool = Arc::new(EntityPool::new(4));
        let gate = Arc::new(Barrier::new(2));
        let handle = {
            let gate = Arc::clone(&gate);
            pool.launch_thread(move || {
                gate.wait();
            })
        };
        pool.release_thread_handle(handle).unwrap();
        assert_eq!(
            pool.kind_of(handle),
            Some(EntityKind::Thread),
            "trampoline still owns the entity"
        );
        gate.wait();
        wait_until("entity release", || pool.stats().in_use == 0);
        assert_eq!(pool.stats().releases, 1);
    }

    #[test]
    fn double_handle_release_is_reported() {
        let pool = Arc::new(EntityPool::new(2));
        let gate = Arc::new(Barrier::new(2));
        let handle = {
            let gate = Arc::clone(&gate);
            pool.launch_thread(move || {
                gate.wait();
            })
        };
        pool.release_thread_handle(handle).unwrap();
        assert_eq!(
            pool.release_thread_handle(handle),
            Err(LayerError::OwnerAlreadyReleased {
                owner: Owner::Handle
            })
        );
        gate.wait();
        wait_until("entity release", || pool.stats().in_use == 0);
        assert!(matches!(
            pool.release_thread_handle(handle),
            Err(LayerError::StaleHandle { .. })
        ));
    }

    #[test]
    fn panicking_thread_still_finalizes() {
        let pool = Arc::new(EntityPool::new(2));
        let handle = pool.launch_thread(|| panic!("thread function failed"));
        pool.release_thread_handle(handle).unwrap();
        wait_until("entity release", || pool.stats().in_use == 0);
        assert!(pool.stats().is_conserved());
    }

    #[test]
    fn current_handle_is_visible_inside_the_thread() {
        let pool = Arc::new(EntityPool::new(2));
        let (tx, rx) = mpsc::channel();
        let handle = pool.launch_thread(move || {
            tx.send((current_thread_handle(), current_thread_id()))
                .unwrap();
        });
        let (seen, tid) = rx.recv().unwrap();
        assert_eq!(seen, handle);
        assert_ne!(tid, 0);
        assert_eq!(current_thread_handle(), Handle::NULL);
        pool.release_thread_handle(handle).unwrap();
    }

    #[test]
    fn threads_are_named_from_config() {
        let pool = Arc::new(EntityPool::from_config(
            LayerConfig::default()
                .with_entity_capacity(2)
                .with_thread_name_prefix("worker"),
        ));
        let (tx, rx) = mpsc::channel();
        let handle = pool.launch_thread(move || {
            let name = std::thread::current().name().map(str::to_owned);
            tx.send(name).unwrap();
        });
        let name = rx.recv().unwrap();
        assert_eq!(name.as_deref(), Some("worker-0"));
        if let Ok(thread) = pool.thread_of(handle) {
            assert_eq!(thread.name(), Some("worker-0"));
        }
        pool.release_thread_handle(handle).unwrap();
    }

    #[test]
    fn thread_handles_reject_other_kinds() {
        let pool = Arc::new(EntityPool::new(2));
        let mutex = pool.try_allocate(EntityKind::Mutex).unwrap();
        assert!(matches!(
            pool.release_thread_handle(mutex),
            Err(LayerError::KindMismatch { .. })
        ));
    }
}
