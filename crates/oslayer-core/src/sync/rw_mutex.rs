//! Reader/writer mutex entities.

use std::fmt;
use std::sync::Arc;

use super::native_err;
use crate::entity::{EntityKind, EntityPool, Handle, Payload};
use crate::error::{LayerError, Result};
use crate::native::NativeRwLock;

/// How a reader/writer mutex is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HoldMode {
    /// Any number of readers at once.
    Shared,
    /// One writer, no readers.
    Exclusive,
}

impl fmt::Display for HoldMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shared => "shared",
            Self::Exclusive => "exclusive",
        })
    }
}

impl EntityPool {
    /// Allocate a reader/writer mutex. [`Handle::NULL`] if the native lock
    /// cannot be created.
    pub fn rw_mutex_alloc(&self) -> Handle {
        self.allocate_with(EntityKind::RwMutex, || {
            NativeRwLock::new().map(|lock| Payload::RwMutex(Arc::new(lock)))
        })
    }

    /// # Errors
    ///
    /// Fails if `handle` does not name a live reader/writer mutex.
    pub fn rw_mutex_release(&self, handle: Handle) -> Result<()> {
        self.release_kind(handle, EntityKind::RwMutex)
    }

    /// Acquire in `mode`, blocking as needed.
    ///
    /// # Errors
    ///
    /// Fails if `handle` does not name a live reader/writer mutex or the
    /// native lock fails (for example `EDEADLK` on a writer re-entering).
    pub fn rw_mutex_take(&self, handle: Handle, mode: HoldMode) -> Result<()> {
        let lock = self.rw_primitive(handle)?;
        match mode {
            HoldMode::Shared => lock.read_lock().map_err(native_err("pthread_rwlock_rdlock")),
            HoldMode::Exclusive => lock.write_lock().map_err(native_err("pthread_rwlock_wrlock")),
        }
    }

    /// Release a hold taken in `mode`.
    ///
    /// # Errors
    ///
    /// Fails if `handle` does not name a live reader/writer mutex or the
    /// caller holds nothing.
    pub fn rw_mutex_drop(&self, handle: Handle, mode: HoldMode) -> Result<()> {
        tracing::trace!(%handle, %mode, "rw mutex drop");
        self.rw_primitive(handle)?
            .unlock()
            .map_err(native_err("pthread_rwlock_unlock"))
    }

    /// # Errors
    ///
    /// See [`rw_mutex_take`](Self::rw_mutex_take).
    pub fn rw_mutex_take_r(&self, handle: Handle) -> Result<()> {
        self.rw_mutex_take(handle, HoldMode::Shared)
    }

    /// # Errors
    ///
    /// See [`rw_mutex_drop`](Self::rw_mutex_drop).
    pub fn rw_mutex_drop_r(&self, handle: Handle) -> Result<()> {
        self.rw_mutex_drop(handle, HoldMode::Shared)
    }

    /// # Errors
    ///
    /// See [`rw_mutex_take`](Self::rw_mutex_take).
    pub fn rw_mutex_take_w(&self, handle: Handle) -> Result<()> {
        self.rw_mutex_take(handle, HoldMode::Exclusive)
    }

    /// # Errors
    ///
    /// See [`rw_mutex_drop`](Self::rw_mutex_drop).
    pub fn rw_mutex_drop_w(&self, handle: Handle) -> Result<()> {
        self.rw_mutex_drop(handle, HoldMode::Exclusive)
    }

    pub(crate) fn rw_primitive(&self, handle: Handle) -> Result<Arc<NativeRwLock>> {
        let slot = self.resolve(handle, EntityKind::RwMutex)?;
        match &*slot.payload.read() {
            Payload::RwMutex(lock) => Ok(Arc::clone(lock)),
            _ => Err(LayerError::Uninitialized {
                kind: EntityKind::RwMutex,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn readers_share_writers_exclude() {
        let pool = Arc::new(EntityPool::new(2));
        let rw = pool.rw_mutex_alloc();
        assert_eq!(pool.kind_of(rw), Some(EntityKind::RwMutex));

        // Two readers hold the lock at the same time.
        let readers_in = Arc::new(Barrier::new(3));
        let readers_out = Arc::new(Barrier::new(3));
        let readers: Vec<_> = (0..2)
            .map(|_| {
                let (pool, readers_in, readers_out) = (
                    Arc::clone(&pool),
                    Arc::clone(&readers_in),
                    Arc::clone(&readers_out),
                );
                std::thread::spawn(move || {
                    pool.rw_mutex_take_r(rw).unwrap();
                    readers_in.wait();
                    readers_out.wait();
                    pool.rw_mutex_drop_r(rw).unwrap();
                })
            })
            .collect();
        readers_in.wait();
        readers_out.wait();
        for reader in readers {
            reader.join().unwrap();
        }

        pool.rw_mutex_take_w(rw).unwrap();
        pool.rw_mutex_drop_w(rw).unwrap();
        pool.rw_mutex_release(rw).unwrap();
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn writers_are_exclusive() {
        let pool = Arc::new(EntityPool::new(2));
        let rw = pool.rw_mutex_alloc();
        let inside = Arc::new(AtomicUsize::new(0));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let (pool, inside) = (Arc::clone(&pool), Arc::clone(&inside));
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        pool.rw_mutex_take_w(rw).unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        pool.rw_mutex_drop_w(rw).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn rw_ops_reject_plain_mutexes() {
        let pool = EntityPool::new(2);
        let mutex = pool.mutex_alloc();
        assert!(matches!(
            pool.rw_mutex_take_r(mutex),
            Err(LayerError::KindMismatch {
                expected: EntityKind::RwMutex,
                found: EntityKind::Mutex,
            })
        ));
    }

    #[test]
    fn hold_mode_names() {
        assert_eq!(HoldMode::Shared.to_string(), "shared");
        assert_eq!(HoldMode::Exclusive.to_string(), "exclusive");
    }
}
