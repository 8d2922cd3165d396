//! Recursive mutex entities.

use std::sync::Arc;

use super::native_err;
use crate::entity::{EntityKind, EntityPool, Handle, Payload};
use crate::error::{LayerError, Result};
use crate::native::NativeMutex;

impl EntityPool {
    /// Allocate a recursive mutex. [`Handle::NULL`] if the native mutex
    /// cannot be created.
    pub fn mutex_alloc(&self) -> Handle {
        self.allocate_with(EntityKind::Mutex, || {
            NativeMutex::recursive().map(|mutex| Payload::Mutex(Arc::new(mutex)))
        })
    }

    /// Destroy the mutex and return its entity to the pool.
    ///
    /// # Errors
    ///
    /// Fails if `handle` does not name a live mutex.
    pub fn mutex_release(&self, handle: Handle) -> Result<()> {
        self.release_kind(handle, EntityKind::Mutex)
    }

    /// Lock the mutex, blocking as needed. The owning thread may take it
    /// again; each take needs a matching [`mutex_drop`](Self::mutex_drop).
    ///
    /// # Errors
    ///
    /// Fails if `handle` does not name a live mutex or the native lock fails.
    pub fn mutex_take(&self, handle: Handle) -> Result<()> {
        self.mutex_primitive(handle)?
            .lock()
            .map_err(native_err("pthread_mutex_lock"))
    }

    /// Unlock one level of the mutex.
    ///
    /// # Errors
    ///
    /// Fails if `handle` does not name a live mutex or the caller does not
    /// hold it.
    pub fn mutex_drop(&self, handle: Handle) -> Result<()> {
        self.mutex_primitive(handle)?
            .unlock()
            .map_err(native_err("pthread_mutex_unlock"))
    }

    pub(crate) fn mutex_primitive(&self, handle: Handle) -> Result<Arc<NativeMutex>> {
        let slot = self.resolve(handle, EntityKind::Mutex)?;
        match &*slot.payload.read() {
            Payload::Mutex(mutex) => Ok(Arc::clone(mutex)),
            _ => Err(LayerError::Uninitialized {
                kind: EntityKind::Mutex,
            }),
        }
    }
}
