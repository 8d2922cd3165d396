//! Opaque handle codec.
//!
//! A handle packs a pool slot and the slot's generation into one `u64`:
//! - Lower 32 bits: slot index + 1 (so the all-zero value is never a live handle)
//! - Upper 32 bits: generation of the slot when the entity was allocated
//!
//! Decoding is pure bit manipulation. Whether the decoded slot is still live is
//! decided by [`EntityPool`](super::EntityPool), which compares generations.

/// Opaque identifier for a live entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Handle(u64);

impl Handle {
    /// Invalid handle, returned when creating an entity fails.
    pub const NULL: Self = Self(0);

    /// Pack a slot index and generation.
    #[inline]
    #[must_use]
    pub(crate) const fn pack(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64 + 1))
    }

    /// Reinterpret a raw value received across the ABI boundary.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value to hand across the ABI boundary.
    #[inline]
    #[must_use]
    pub const fn into_raw(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        (self.0 as u32) == 0
    }

    /// Slot index, or `None` for a null handle.
    #[inline]
    #[must_use]
    pub const fn index(self) -> Option<u32> {
        match self.0 as u32 {
            0 => None,
            biased => Some(biased - 1),
        }
    }

    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.index() {
            Some(index) => write!(f, "#{index}@{}", self.generation()),
            None => f.write_str("#null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_has_no_slot() {
        assert!(Handle::NULL.is_null());
        assert_eq!(Handle::NULL.index(), None);
        assert_eq!(Handle::default(), Handle::NULL);
        assert_eq!(Handle::NULL.to_string(), "#null");
    }

    #[test]
    fn slot_zero_generation_zero_is_not_null() {
        let handle = Handle::pack(0, 0);
        assert!(!handle.is_null());
        assert_eq!(handle.into_raw(), 1);
        assert_eq!(handle.index(), Some(0));
    }

    #[test]
    fn generation_occupies_high_half() {
        let handle = Handle::pack(41, 7);
        assert_eq!(handle.into_raw(), (7u64 << 32) | 42);
        assert_eq!(handle.generation(), 7);
        assert_eq!(handle.index(), Some(41));
        assert_eq!(handle.to_string(), "#41@7");
    }

    #[test]
    fn raw_value_survives_the_abi_boundary() {
        let handle = Handle::pack(1023, u32::MAX);
        assert_eq!(Handle::from_raw(handle.into_raw()), handle);
    }

    #[test]
    fn generations_distinguish_reuse_of_a_slot() {
        assert_ne!(Handle::pack(3, 1), Handle::pack(3, 2));
    }

    #[test]
    fn zero_low_half_is_null_regardless_of_generation() {
        assert!(Handle::from_raw(5u64 << 32).is_null());
    }
}
