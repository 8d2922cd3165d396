//! Error taxonomy for the entity layer.
//!
//! Pool exhaustion and faults inside a guarded call are fatal and never reach
//! a caller as a value; everything here is either a recoverable native
//! failure or a caller contract violation that the generation-tagged handle
//! made detectable.

use thiserror::Error;

use crate::entity::EntityKind;
use crate::thread::Owner;

/// Errors reported by entity, thread, synchronization and guarded-call operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayerError {
    /// Every pooled entity is in use.
    #[error("entity pool exhausted (capacity {capacity})")]
    PoolExhausted { capacity: usize },

    /// The handle is null, out of range, or its entity was already released.
    #[error("handle {handle:#018x} does not name a live entity")]
    StaleHandle { handle: u64 },

    /// The handle names a live entity of another kind.
    #[error("handle names a {found} entity, expected {expected}")]
    KindMismatch {
        expected: EntityKind,
        found: EntityKind,
    },

    /// The owner bit was already cleared on this thread entity.
    #[error("{owner} ownership of the thread entity was already released")]
    OwnerAlreadyReleased { owner: Owner },

    /// The entity is live but carries no native primitive yet.
    #[error("{kind} entity has no native primitive attached")]
    Uninitialized { kind: EntityKind },

    /// The native primitive backing a new entity could not be created.
    #[error("native {kind} creation failed (errno {errno})")]
    NativeCreate { kind: EntityKind, errno: i32 },

    /// A native operation on a live primitive failed.
    #[error("native {op} failed (errno {errno})")]
    Native { op: &'static str, errno: i32 },

    /// The native thread could not be started.
    #[error("thread spawn failed: {reason}")]
    Spawn { reason: String },

    /// Installing or restoring a signal disposition failed.
    #[error("sigaction({signum}) failed (errno {errno})")]
    Signal { signum: i32, errno: i32 },
}

impl LayerError {
    /// Errno-style code for the ABI boundary.
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::PoolExhausted { .. } | Self::Spawn { .. } => libc::EAGAIN,
            Self::StaleHandle { .. } | Self::KindMismatch { .. } | Self::Uninitialized { .. } => {
                libc::EINVAL
            }
            Self::OwnerAlreadyReleased { .. } => libc::EPERM,
            Self::NativeCreate { errno, .. }
            | Self::Native { errno, .. }
            | Self::Signal { errno, .. } => *errno,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, LayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_entity_kinds() {
        let err = LayerError::KindMismatch {
            expected: EntityKind::Mutex,
            found: EntityKind::ConditionVariable,
        };
        assert_eq!(
            err.to_string(),
            "handle names a condition variable entity, expected mutex"
        );
    }

    #[test]
    fn stale_handle_message_is_hex() {
        let err = LayerError::StaleHandle { handle: 0x1_0000_0002 };
        assert_eq!(
            err.to_string(),
            "handle 0x0000000100000002 does not name a live entity"
        );
    }

    #[test]
    fn errno_mapping() {
        assert_eq!(
            LayerError::PoolExhausted { capacity: 4 }.errno(),
            libc::EAGAIN
        );
        assert_eq!(LayerError::StaleHandle { handle: 0 }.errno(), libc::EINVAL);
        assert_eq!(
            LayerError::OwnerAlreadyReleased {
                owner: Owner::Handle
            }
            .errno(),
            libc::EPERM
        );
        assert_eq!(
            LayerError::Native {
                op: "pthread_mutex_lock",
                errno: libc::EDEADLK
            }
            .errno(),
            libc::EDEADLK
        );
    }
}
