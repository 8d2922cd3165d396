//! # oslayer-core
//!
//! Entity lifecycle and handle safety for a portable OS abstraction layer.
//!
//! Threads, recursive mutexes, reader/writer mutexes and condition variables
//! are all backed by records ("entities") drawn from one fixed-capacity
//! [`EntityPool`]. Callers only ever see an opaque [`Handle`]: a slot index
//! tagged with the slot's generation, so a handle that outlives its entity is
//! rejected instead of aliasing whatever reuses the slot.
//!
//! The [`safe_call`] module runs a function under crash protection: hardware
//! fault signals raised on the calling thread are reported to the innermost
//! registered handler, then the process terminates.
//!
//! No `unsafe` code is permitted at the crate level. The [`native`] wrappers
//! around pthread objects and `sigaction`, and the signal-context side of
//! [`safe_call`], opt in explicitly.

#![deny(unsafe_code)]

pub mod config;
pub mod entity;
pub mod error;
#[allow(unsafe_code)]
pub mod native;
#[allow(unsafe_code)]
pub mod safe_call;
pub mod signal;
pub mod sync;
pub mod thread;
pub mod time;

pub use config::LayerConfig;
pub use entity::{EntityKind, EntityPool, Handle, PoolStats};
pub use error::{LayerError, Result};
pub use safe_call::{FAULT_SIGNALS, FaultHandler, SafeCallGuard, safe_call};
pub use signal::signal_name;
pub use sync::HoldMode;
pub use thread::{Finalize, Owner, ReferenceMask, current_thread_handle, current_thread_id};
pub use time::{Deadline, NO_DEADLINE, now_microseconds, sleep_milliseconds};
