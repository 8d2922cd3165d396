//! Mutex, reader/writer mutex and condition-variable entities.
//!
//! These are single-owner entities: `*_alloc` creates the native primitive
//! and hands out a handle, `*_release` returns the entity to the pool
//! unconditionally. Lock, wait and signal operations resolve the handle to
//! its primitive through the slot's own payload lock and never take the pool
//! lock.
//!
//! A primitive is held by `Arc`, so an operation already in flight when its
//! entity is released finishes against the old primitive; the native object
//! is destroyed when the last such reference drops.

pub mod condvar;
pub mod mutex;
pub mod rw_mutex;

pub use rw_mutex::HoldMode;

use crate::entity::{EntityKind, EntityPool, Handle, Payload};
use crate::error::{LayerError, Result};

/// Map a raw errno from a native call into a [`LayerError::Native`].
pub(crate) fn native_err(op: &'static str) -> impl Fn(i32) -> LayerError {
    move |errno| LayerError::Native { op, errno }
}

impl EntityPool {
    /// Allocate an entity of `kind` and attach the primitive `create` builds.
    ///
    /// Creation failure releases the entity and yields [`Handle::NULL`].
    pub(crate) fn allocate_with(
        &self,
        kind: EntityKind,
        create: impl FnOnce() -> std::result::Result<Payload, i32>,
    ) -> Handle {
        let handle = self.allocate(kind);
        match create() {
            Ok(payload) => match self.live_slot(handle) {
                Ok(slot) => {
                    slot.set_payload(payload);
                    handle
                }
                Err(err) => {
                    tracing::error!(%handle, %err, "freshly allocated entity is not live");
                    Handle::NULL
                }
            },
            Err(errno) => self.abandon(handle, kind, errno),
        }
    }

    /// Release a single-owner entity after checking its kind.
    pub(crate) fn release_kind(&self, handle: Handle, kind: EntityKind) -> Result<()> {
        self.resolve(handle, kind)?;
        self.release(handle)
    }
}
