//! Fixed-capacity entity pool.
//!
//! Every thread binding, recursive mutex, reader/writer mutex and condition
//! variable lives in one slot of an [`EntityPool`]. The pool is sized once
//! and never grows; running out of slots aborts the process.
//!
//! ## Layout
//!
//! - `slots`: the entity records. Kind and generation are atomics so handle
//!   validation on the hot path (lock/unlock, signal/wait) never touches the
//!   pool lock.
//! - `free`: an index-linked LIFO free list behind one process-wide
//!   re-entrant lock. Only allocate/release/stats take it.
//!
//! A slot is either on the free list (`kind == Null`) or allocated with a
//! non-null kind. Releasing a slot bumps its generation, which invalidates
//! every [`Handle`] issued for the previous occupant.

pub mod handle;

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

use parking_lot::{ReentrantMutex, RwLock};

use crate::config::{LayerConfig, MAX_ENTITY_CAPACITY};
use crate::error::{LayerError, Result};
use crate::native::{self, NativeCondvar, NativeMutex, NativeRwLock};
use crate::thread::{ReferenceMask, ThreadBinding};

pub use handle::Handle;

// ---------------------------------------------------------------------------
// Entity kinds
// ---------------------------------------------------------------------------

/// What a pool slot currently represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntityKind {
    /// On the free list.
    Null = 0,
    Thread = 1,
    Mutex = 2,
    RwMutex = 3,
    ConditionVariable = 4,
}

impl EntityKind {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Thread,
            2 => Self::Mutex,
            3 => Self::RwMutex,
            4 => Self::ConditionVariable,
            _ => Self::Null,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Thread => "thread",
            Self::Mutex => "mutex",
            Self::RwMutex => "rw mutex",
            Self::ConditionVariable => "condition variable",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Native state attached to an allocated entity. Only the variant matching
/// the slot's kind is ever stored.
pub(crate) enum Payload {
    Vacant,
    Thread(ThreadBinding),
    Mutex(Arc<NativeMutex>),
    RwMutex(Arc<NativeRwLock>),
    ConditionVariable(Arc<NativeCondvar>),
}

pub(crate) struct EntitySlot {
    kind: AtomicU8,
    generation: AtomicU32,
    /// Two-owner finalization bits; only meaningful for `Thread` entities.
    pub(crate) reference_mask: ReferenceMask,
    pub(crate) payload: RwLock<Payload>,
}

impl EntitySlot {
    fn vacant() -> Self {
        Self {
            kind: AtomicU8::new(EntityKind::Null as u8),
            generation: AtomicU32::new(0),
            reference_mask: ReferenceMask::new(),
            payload: RwLock::new(Payload::Vacant),
        }
    }

    #[inline]
    pub(crate) fn kind(&self) -> EntityKind {
        EntityKind::from_u8(self.kind.load(Ordering::Acquire))
    }

    pub(crate) fn set_payload(&self, payload: Payload) {
        *self.payload.write() = payload;
    }
}

/// Free-list state guarded by the pool lock.
struct FreeList {
    head: Option<u32>,
    next: Box<[Option<u32>]>,
    in_use: usize,
}

impl FreeList {
    fn full(capacity: usize) -> Self {
        let next: Vec<Option<u32>> = (0..capacity)
            .map(|i| if i + 1 < capacity { Some(i as u32 + 1) } else { None })
            .collect();
        Self {
            head: if capacity == 0 { None } else { Some(0) },
            next: next.into_boxed_slice(),
            in_use: 0,
        }
    }

    fn len(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.head;
        while let Some(index) = cursor {
            count += 1;
            cursor = self.next[index as usize];
        }
        count
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    /// Slots currently allocated.
    pub in_use: usize,
    /// Slots reachable from the free list.
    pub free: usize,
    /// Total successful allocations since creation.
    pub allocations: u64,
    /// Total releases back to the free list since creation.
    pub releases: u64,
}

impl PoolStats {
    /// Every slot is accounted for exactly once.
    #[must_use]
    pub const fn is_conserved(&self) -> bool {
        self.in_use + self.free == self.capacity
    }
}

/// Process-scoped pool of entity records.
///
/// Create one per process (the ABI layer keeps it in a `OnceLock`) and pass
/// it as `Arc<EntityPool>` to whatever launches threads.
pub struct EntityPool {
    slots: Box<[EntitySlot]>,
    free: ReentrantMutex<RefCell<FreeList>>,
    allocations: AtomicU64,
    releases: AtomicU64,
    config: LayerConfig,
}

impl EntityPool {
    /// Create a pool with `capacity` slots and otherwise default settings.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::from_config(LayerConfig::default().with_entity_capacity(capacity))
    }

    /// Create a pool sized and configured from `config`.
    #[must_use]
    pub fn from_config(config: LayerConfig) -> Self {
        let capacity = config.entity_capacity.clamp(1, MAX_ENTITY_CAPACITY);
        let config = LayerConfig {
            entity_capacity: capacity,
            ..config
        };
        let slots: Vec<EntitySlot> = (0..capacity).map(|_| EntitySlot::vacant()).collect();
        tracing::debug!(capacity, "entity pool created");
        Self {
            slots: slots.into_boxed_slice(),
            free: ReentrantMutex::new(RefCell::new(FreeList::full(capacity))),
            allocations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Pop a slot off the free list and tag it with `kind`.
    ///
    /// The returned entity carries no native primitive; attaching one is the
    /// caller's job.
    ///
    /// # Errors
    ///
    /// [`LayerError::PoolExhausted`] when every slot is in use.
    pub fn try_allocate(&self, kind: EntityKind) -> Result<Handle> {
        debug_assert!(kind != EntityKind::Null, "cannot allocate a null entity");
        let handle = {
            let guard = self.free.lock();
            let mut free = guard.borrow_mut();
            let free = &mut *free;
            let Some(index) = free.head else {
                return Err(LayerError::PoolExhausted {
                    capacity: self.capacity(),
                });
            };
            free.head = free.next[index as usize].take();
            free.in_use += 1;
            let slot = &self.slots[index as usize];
            slot.kind.store(kind as u8, Ordering::Release);
            Handle::pack(index, slot.generation.load(Ordering::Acquire))
        };
        self.allocations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%handle, %kind, "entity allocated");
        Ok(handle)
    }

    /// Like [`try_allocate`](Self::try_allocate), but exhaustion is fatal.
    pub fn allocate(&self, kind: EntityKind) -> Handle {
        match self.try_allocate(kind) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(%err, %kind, "cannot allocate entity; aborting");
                native::abort_process()
            }
        }
    }

    /// Return a live entity to the free list.
    ///
    /// The slot's generation is bumped under the pool lock, so every
    /// outstanding copy of `handle` goes stale at once. The detached native
    /// primitive is destroyed after the lock is dropped.
    ///
    /// # Errors
    ///
    /// [`LayerError::StaleHandle`] when `handle` was already released.
    pub fn release(&self, handle: Handle) -> Result<()> {
        let (slot, index) = self.locate(handle)?;
        let vacated = {
            let guard = self.free.lock();
            let mut free = guard.borrow_mut();
            let free = &mut *free;
            if slot.generation.load(Ordering::Acquire) != handle.generation()
                || slot.kind() == EntityKind::Null
            {
                return Err(LayerError::StaleHandle {
                    handle: handle.into_raw(),
                });
            }
            let vacated = std::mem::replace(&mut *slot.payload.write(), Payload::Vacant);
            slot.kind.store(EntityKind::Null as u8, Ordering::Release);
            slot.generation.fetch_add(1, Ordering::AcqRel);
            free.next[index as usize] = free.head;
            free.head = Some(index);
            free.in_use -= 1;
            vacated
        };
        drop(vacated);
        self.releases.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%handle, "entity released");
        Ok(())
    }

    /// Kind of the entity `handle` names, or `None` once it was released.
    #[must_use]
    pub fn kind_of(&self, handle: Handle) -> Option<EntityKind> {
        self.live_slot(handle).ok().map(EntitySlot::kind)
    }

    /// Snapshot the pool counters under the pool lock.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let guard = self.free.lock();
        let free = guard.borrow();
        PoolStats {
            capacity: self.capacity(),
            in_use: free.in_use,
            free: free.len(),
            allocations: self.allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
        }
    }

    fn locate(&self, handle: Handle) -> Result<(&EntitySlot, u32)> {
        let stale = LayerError::StaleHandle {
            handle: handle.into_raw(),
        };
        let index = handle.index().ok_or_else(|| stale.clone())?;
        let slot = self.slots.get(index as usize).ok_or(stale)?;
        Ok((slot, index))
    }

    /// Slot for a handle whose generation still matches and whose entity is live.
    pub(crate) fn live_slot(&self, handle: Handle) -> Result<&EntitySlot> {
        let (slot, _) = self.locate(handle)?;
        if slot.generation.load(Ordering::Acquire) != handle.generation()
            || slot.kind() == EntityKind::Null
        {
            return Err(LayerError::StaleHandle {
                handle: handle.into_raw(),
            });
        }
        Ok(slot)
    }

    /// Live slot of the expected kind.
    pub(crate) fn resolve(&self, handle: Handle, expected: EntityKind) -> Result<&EntitySlot> {
        let slot = self.live_slot(handle)?;
        let found = slot.kind();
        if found != expected {
            return Err(LayerError::KindMismatch { expected, found });
        }
        Ok(slot)
    }

    /// Release an entity whose native primitive could not be created and
    /// hand back the null sentinel.
    pub(crate) fn abandon(&self, handle: Handle, kind: EntityKind, errno: i32) -> Handle {
        let err = LayerError::NativeCreate { kind, errno };
        tracing::warn!(%handle, %err, "native primitive creation failed");
        if let Err(release_err) = self.release(handle) {
            tracing::error!(%handle, %release_err, "could not return abandoned entity");
        }
        Handle::NULL
    }
}

impl std::fmt::Debug for EntityPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityPool")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
