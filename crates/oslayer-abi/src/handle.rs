//! C-layout handle.

use oslayer_core::Handle;

/// Opaque handle as seen from C: `struct { U64 u64[1]; }`.
///
/// The value is a generation-tagged entity handle; all-zero is invalid.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OsHandle {
    pub u64: [u64; 1],
}

impl OsHandle {
    pub const ZERO: Self = Self { u64: [0] };

    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.u64[0] == 0
    }
}

impl From<Handle> for OsHandle {
    fn from(handle: Handle) -> Self {
        Self {
            u64: [handle.into_raw()],
        }
    }
}

impl From<OsHandle> for Handle {
    fn from(handle: OsHandle) -> Self {
        Handle::from_raw(handle.u64[0])
    }
}

/// The zero (invalid) handle.
#[unsafe(no_mangle)]
pub extern "C" fn os_handle_zero() -> OsHandle {
    OsHandle::ZERO
}

/// 1 when both handles name the same entity (or are both zero), else 0.
#[unsafe(no_mangle)]
pub extern "C" fn os_handle_match(a: OsHandle, b: OsHandle) -> i32 {
    i32::from(a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_one_u64() {
        assert_eq!(std::mem::size_of::<OsHandle>(), 8);
        assert_eq!(std::mem::align_of::<OsHandle>(), 8);
    }

    #[test]
    fn conversion_preserves_generation() {
        let raw = (3u64 << 32) | 9;
        let handle = Handle::from_raw(raw);
        let os: OsHandle = handle.into();
        assert_eq!(os.u64, [raw]);
        assert_eq!(Handle::from(os), handle);
    }

    #[test]
    fn match_and_zero() {
        assert!(os_handle_zero().is_zero());
        assert_eq!(os_handle_match(OsHandle::ZERO, os_handle_zero()), 1);
        assert_eq!(os_handle_match(OsHandle { u64: [1] }, OsHandle { u64: [2] }), 0);
    }
}
