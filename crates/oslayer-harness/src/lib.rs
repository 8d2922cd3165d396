//! Scenario harness for the oslayer entity lifecycle.
//!
//! This crate provides:
//! - Scenarios: executable versions of the pool, thread, mutex and guarded
//!   call properties, each producing a serializable [`ScenarioReport`]
//! - Structured logging: the JSONL log contract scenarios emit and validate
//! - The `harness` CLI, which also hosts the process-terminating scenarios
//!   (`exhaust_pool`, `nested_fault`) so tests can observe them from outside

#![forbid(unsafe_code)]

pub mod error;
pub mod scenarios;
pub mod structured_log;

pub use error::HarnessError;
pub use scenarios::{Scenario, ScenarioOptions, ScenarioReport};
pub use structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
