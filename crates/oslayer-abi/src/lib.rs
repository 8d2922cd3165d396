// All extern "C" exports take opaque handles or raw pointers from C callers;
// handles are validated by the entity pool, so per-function safety docs would
// be redundant boilerplate.
#![allow(clippy::missing_safety_doc)]
//! # oslayer-abi
//!
//! extern "C" boundary over `oslayer-core`.
//!
//! Every entry point resolves the process-scoped [`EntityPool`] through
//! [`runtime::pool`], converts the C-side [`OsHandle`] into a generation
//! tagged [`Handle`], and delegates. Contract violations the pool can detect
//! (stale handle, wrong kind, double release) are logged and turned into a
//! no-op or a zero/false return instead of touching a recycled entity.
//!
//! ```text
//! C caller -> os_* entry (this crate) -> EntityPool (core) -> pthread / sigaction
//! ```
//!
//! [`EntityPool`]: oslayer_core::EntityPool
//! [`Handle`]: oslayer_core::Handle

pub mod handle;
pub mod runtime;
pub mod safe_call_abi;
pub mod sync_abi;
pub mod thread_abi;
pub mod time_abi;

pub use handle::OsHandle;
