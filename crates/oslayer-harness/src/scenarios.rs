//! Executable lifecycle scenarios.
//!
//! Every scenario builds its own [`EntityPool`] from [`ScenarioOptions`],
//! logs its progress through a [`LogEmitter`], and returns a
//! [`ScenarioReport`] or a [`HarnessError::Invariant`] describing the first
//! violated property. `exhaust_pool`, `nested_fault` and
//! `guarded_stack_overflow` end the process by design and only return if the
//! layer failed to terminate it.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use clap::ValueEnum;
use oslayer_core::safe_call::fault_dispositions;
use oslayer_core::{EntityKind, EntityPool, Handle, LayerConfig, native, safe_call};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::structured_log::{LogEmitter, LogLevel, Outcome};

/// How long a scenario waits for background threads before declaring a leak.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Stack of the thread that overflows on purpose; small so it fills fast.
const OVERFLOW_STACK_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Scenario {
    /// Randomized thread-finish vs handle-release interleavings.
    ThreadReleaseRace,
    /// Thread returns at once; handle released 50 ms later.
    DelayedHandleRelease,
    /// Two threads contend for one recursive mutex.
    MutexExclusion,
    /// Random allocate/release mixes across every single-owner kind.
    PoolConservation,
    /// Nested guarded calls leave the fault dispositions as found.
    SafeCallRestoration,
    /// Allocate past capacity; the process must abort.
    ExhaustPool,
    /// Fault inside a nested guarded call; only the inner handler may run.
    NestedFault,
    /// Unbounded recursion inside a guarded call; the handler must still run.
    GuardedStackOverflow,
}

impl Scenario {
    pub const ALL: [Self; 8] = [
        Self::ThreadReleaseRace,
        Self::DelayedHandleRelease,
        Self::MutexExclusion,
        Self::PoolConservation,
        Self::SafeCallRestoration,
        Self::ExhaustPool,
        Self::NestedFault,
        Self::GuardedStackOverflow,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ThreadReleaseRace => "thread_release_race",
            Self::DelayedHandleRelease => "delayed_handle_release",
            Self::MutexExclusion => "mutex_exclusion",
            Self::PoolConservation => "pool_conservation",
            Self::SafeCallRestoration => "safe_call_restoration",
            Self::ExhaustPool => "exhaust_pool",
            Self::NestedFault => "nested_fault",
            Self::GuardedStackOverflow => "guarded_stack_overflow",
        }
    }

    /// Scenarios whose passing outcome is abnormal process termination.
    #[must_use]
    pub const fn terminates_process(self) -> bool {
        matches!(
            self,
            Self::ExhaustPool | Self::NestedFault | Self::GuardedStackOverflow
        )
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Knobs shared by all scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOptions {
    pub seed: u64,
    pub iterations: u32,
    pub capacity: usize,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            seed: 0x05_1A7E,
            iterations: 64,
            capacity: 64,
        }
    }
}

/// Result of a completed scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub outcome: Outcome,
    pub iterations: u32,
    pub capacity: usize,
    pub allocations: u64,
    pub releases: u64,
    pub in_use_after: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Run one scenario.
///
/// # Errors
///
/// [`HarnessError::Invariant`] when a property does not hold, or any layer
/// or logging failure along the way.
pub fn run(
    scenario: Scenario,
    options: &ScenarioOptions,
    log: &mut LogEmitter,
) -> Result<ScenarioReport, HarnessError> {
    let pool = Arc::new(EntityPool::from_config(
        LayerConfig::default()
            .with_entity_capacity(options.capacity)
            .with_thread_name_prefix(scenario.name()),
    ));
    let entry = log
        .entry(LogLevel::Info, "scenario_start")
        .with_scenario(scenario.name())
        .with_pool(pool.capacity(), 0, 0)
        .with_details(serde_json::json!({
            "seed": options.seed,
            "iterations": options.iterations,
        }));
    log.emit_entry(entry)?;

    let start = Instant::now();
    let details = match scenario {
        Scenario::ThreadReleaseRace => thread_release_race(&pool, options)?,
        Scenario::DelayedHandleRelease => delayed_handle_release(&pool)?,
        Scenario::MutexExclusion => mutex_exclusion(&pool, options)?,
        Scenario::PoolConservation => pool_conservation(&pool, options)?,
        Scenario::SafeCallRestoration => safe_call_restoration()?,
        Scenario::ExhaustPool => exhaust_pool(&pool, log)?,
        Scenario::NestedFault => nested_fault(log)?,
        Scenario::GuardedStackOverflow => guarded_stack_overflow(log)?,
    };
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let stats = pool.stats();
    if !stats.is_conserved() {
        return Err(HarnessError::invariant(
            scenario.name(),
            format!("pool not conserved: {stats:?}"),
        ));
    }
    let report = ScenarioReport {
        scenario,
        outcome: Outcome::Pass,
        iterations: options.iterations,
        capacity: stats.capacity,
        allocations: stats.allocations,
        releases: stats.releases,
        in_use_after: stats.in_use,
        duration_ms,
        details,
    };
    let entry = log
        .entry(LogLevel::Info, "scenario_end")
        .with_scenario(scenario.name())
        .with_outcome(report.outcome)
        .with_pool(stats.capacity, stats.in_use, stats.releases)
        .with_duration_ms(duration_ms);
    log.emit_entry(entry)?;
    log.flush()?;
    Ok(report)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn settle(pool: &EntityPool, scenario: &'static str, in_use: usize) -> Result<(), HarnessError> {
    let start = Instant::now();
    loop {
        let stats = pool.stats();
        if stats.in_use == in_use {
            return Ok(());
        }
        if start.elapsed() > SETTLE_TIMEOUT {
            return Err(HarnessError::invariant(
                scenario,
                format!("expected {in_use} entities in use, pool stuck at {stats:?}"),
            ));
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn ensure(condition: bool, scenario: &'static str, message: impl FnOnce() -> String) -> Result<(), HarnessError> {
    if condition {
        Ok(())
    } else {
        Err(HarnessError::invariant(scenario, message()))
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

fn thread_release_race(
    pool: &Arc<EntityPool>,
    options: &ScenarioOptions,
) -> Result<Option<serde_json::Value>, HarnessError> {
    const NAME: &str = "thread_release_race";
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut launch_failures = 0u32;
    for _ in 0..options.iterations {
        let work = Duration::from_micros(rng.gen_range(0..500));
        let delay = Duration::from_micros(rng.gen_range(0..500));
        let handle = pool.launch_thread(move || std::thread::sleep(work));
        if handle.is_null() {
            launch_failures += 1;
            continue;
        }
        std::thread::sleep(delay);
        pool.release_thread_handle(handle)?;
    }
    settle(pool, NAME, 0)?;
    let stats = pool.stats();
    ensure(stats.releases == stats.allocations, NAME, || {
        format!("{} allocations but {} releases", stats.allocations, stats.releases)
    })?;
    Ok(Some(serde_json::json!({ "launch_failures": launch_failures })))
}

fn delayed_handle_release(pool: &Arc<EntityPool>) -> Result<Option<serde_json::Value>, HarnessError> {
    const NAME: &str = "delayed_handle_release";
    let baseline = pool.stats().in_use;
    let handle = pool.launch_thread(|| {});
    ensure(!handle.is_null(), NAME, || "thread launch failed".to_string())?;

    let start = Instant::now();
    while pool.thread_is_running(handle)? {
        ensure(start.elapsed() < SETTLE_TIMEOUT, NAME, || {
            "thread function never returned".to_string()
        })?;
        std::thread::sleep(Duration::from_millis(1));
    }
    std::thread::sleep(Duration::from_millis(50));
    let held = pool.stats().in_use;
    ensure(held == baseline + 1, NAME, || {
        format!("entity released early: in_use {held}, baseline {baseline}")
    })?;
    ensure(pool.kind_of(handle) == Some(EntityKind::Thread), NAME, || {
        "entity lost its thread kind before the handle was released".to_string()
    })?;

    pool.release_thread_handle(handle)?;
    let after = pool.stats().in_use;
    ensure(after == baseline, NAME, || {
        format!("handle release did not finalize: in_use {after}, baseline {baseline}")
    })?;
    Ok(None)
}

fn mutex_exclusion(
    pool: &Arc<EntityPool>,
    options: &ScenarioOptions,
) -> Result<Option<serde_json::Value>, HarnessError> {
    const NAME: &str = "mutex_exclusion";
    let mutex = pool.mutex_alloc();
    ensure(!mutex.is_null(), NAME, || "mutex allocation failed".to_string())?;

    let inside = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicBool::new(false));
    let entered = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(3));

    pool.mutex_take(mutex)?;
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let (pool, inside, overlap, entered, start) = (
                Arc::clone(pool),
                Arc::clone(&inside),
                Arc::clone(&overlap),
                Arc::clone(&entered),
                Arc::clone(&start),
            );
            let rounds = options.iterations;
            std::thread::spawn(move || -> Result<(), HarnessError> {
                start.wait();
                for _ in 0..rounds {
                    pool.mutex_take(mutex)?;
                    entered.fetch_add(1, Ordering::SeqCst);
                    if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlap.store(true, Ordering::SeqCst);
                    }
                    std::thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                    pool.mutex_drop(mutex)?;
                }
                Ok(())
            })
        })
        .collect();

    start.wait();
    std::thread::sleep(Duration::from_millis(20));
    let while_held = entered.load(Ordering::SeqCst);
    pool.mutex_drop(mutex)?;

    for worker in workers {
        worker
            .join()
            .map_err(|_| HarnessError::invariant(NAME, "worker panicked"))??;
    }
    pool.mutex_release(mutex)?;

    ensure(while_held == 0, NAME, || {
        format!("{while_held} critical sections entered while the main thread held the mutex")
    })?;
    ensure(!overlap.load(Ordering::SeqCst), NAME, || {
        "two threads were inside the critical section at once".to_string()
    })?;
    Ok(Some(serde_json::json!({
        "critical_sections": entered.load(Ordering::SeqCst),
    })))
}

fn pool_conservation(
    pool: &Arc<EntityPool>,
    options: &ScenarioOptions,
) -> Result<Option<serde_json::Value>, HarnessError> {
    const NAME: &str = "pool_conservation";
    const KINDS: [EntityKind; 3] = [
        EntityKind::Mutex,
        EntityKind::RwMutex,
        EntityKind::ConditionVariable,
    ];
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut live: Vec<(EntityKind, Handle)> = Vec::new();
    let steps = options.iterations.saturating_mul(16);

    for step in 0..steps {
        let grow = live.is_empty() || (live.len() < pool.capacity() && rng.gen_bool(0.55));
        if grow {
            let kind = KINDS[rng.gen_range(0..KINDS.len())];
            let handle = match kind {
                EntityKind::Mutex => pool.mutex_alloc(),
                EntityKind::RwMutex => pool.rw_mutex_alloc(),
                _ => pool.condition_variable_alloc(),
            };
            ensure(!handle.is_null(), NAME, || format!("step {step}: {kind} allocation failed"))?;
            live.push((kind, handle));
        } else {
            let (kind, handle) = live.swap_remove(rng.gen_range(0..live.len()));
            match kind {
                EntityKind::Mutex => pool.mutex_release(handle)?,
                EntityKind::RwMutex => pool.rw_mutex_release(handle)?,
                _ => pool.condition_variable_release(handle)?,
            }
        }
        let stats = pool.stats();
        ensure(
            stats.is_conserved() && stats.in_use == live.len(),
            NAME,
            || format!("step {step}: {stats:?} with {} live handles", live.len()),
        )?;
    }
    for (_, handle) in live.drain(..) {
        pool.release(handle)?;
    }
    Ok(Some(serde_json::json!({ "steps": steps })))
}

extern "C" fn outer_fail_handler(_user_ptr: *mut c_void) {
    native::write_stderr_raw(b"fail_handler: outer\n");
}

extern "C" fn inner_fail_handler(_user_ptr: *mut c_void) {
    native::write_stderr_raw(b"fail_handler: inner\n");
}

extern "C" fn overflow_fail_handler(_user_ptr: *mut c_void) {
    native::write_stderr_raw(b"fail_handler: stack overflow\n");
}

fn safe_call_restoration() -> Result<Option<serde_json::Value>, HarnessError> {
    const NAME: &str = "safe_call_restoration";
    let before = fault_dispositions()?;
    let nested_ok = safe_call(
        || -> Result<bool, HarnessError> {
            let at_inner_entry = fault_dispositions()?;
            safe_call(|| (), Some(inner_fail_handler), std::ptr::null_mut())?;
            Ok(fault_dispositions()? == at_inner_entry)
        },
        Some(outer_fail_handler),
        std::ptr::null_mut(),
    )??;
    ensure(nested_ok, NAME, || {
        "inner guarded call changed the dispositions it found".to_string()
    })?;
    let after = fault_dispositions()?;
    ensure(after == before, NAME, || {
        format!("dispositions changed: before {before:?}, after {after:?}")
    })?;
    Ok(Some(serde_json::json!({ "signals": before.len() })))
}

fn exhaust_pool(
    pool: &Arc<EntityPool>,
    log: &mut LogEmitter,
) -> Result<Option<serde_json::Value>, HarnessError> {
    for _ in 0..pool.capacity() {
        let handle = pool.mutex_alloc();
        if handle.is_null() {
            return Err(HarnessError::invariant(
                "exhaust_pool",
                "allocation failed before the pool was full",
            ));
        }
    }
    let stats = pool.stats();
    let entry = log
        .entry(LogLevel::Fatal, "pool_full")
        .with_scenario("exhaust_pool")
        .with_entity_kind("mutex")
        .with_pool(stats.capacity, stats.in_use, stats.releases);
    log.emit_entry(entry)?;
    log.flush()?;

    let extra = pool.mutex_alloc();
    Err(HarnessError::invariant(
        "exhaust_pool",
        format!("allocation past capacity returned {extra} instead of aborting"),
    ))
}

fn nested_fault(log: &mut LogEmitter) -> Result<Option<serde_json::Value>, HarnessError> {
    let entry = log
        .entry(LogLevel::Fatal, "raising_fault")
        .with_scenario("nested_fault")
        .with_details(serde_json::json!({ "signal": oslayer_core::signal_name(libc::SIGSEGV) }));
    log.emit_entry(entry)?;
    log.flush()?;

    safe_call(
        || {
            safe_call(
                || native::raise(libc::SIGSEGV),
                Some(inner_fail_handler),
                std::ptr::null_mut(),
            )
        },
        Some(outer_fail_handler),
        std::ptr::null_mut(),
    )??
    .map_err(|errno| {
        HarnessError::invariant("nested_fault", format!("raise failed with errno {errno}"))
    })?;
    Err(HarnessError::invariant(
        "nested_fault",
        "fault inside a guarded call did not terminate the process",
    ))
}

fn recurse(depth: u64) -> u64 {
    let frame = std::hint::black_box([depth.to_le_bytes()[0]; 512]);
    if std::hint::black_box(depth) == u64::MAX {
        return 0;
    }
    recurse(depth + 1).wrapping_add(u64::from(frame[511]))
}

fn guarded_stack_overflow(log: &mut LogEmitter) -> Result<Option<serde_json::Value>, HarnessError> {
    const NAME: &str = "guarded_stack_overflow";
    let entry = log
        .entry(LogLevel::Fatal, "overflowing_stack")
        .with_scenario(NAME)
        .with_details(serde_json::json!({ "stack_size": OVERFLOW_STACK_SIZE }));
    log.emit_entry(entry)?;
    log.flush()?;

    let overflow = std::thread::Builder::new()
        .name(NAME.to_string())
        .stack_size(OVERFLOW_STACK_SIZE)
        .spawn(|| safe_call(|| recurse(0), Some(overflow_fail_handler), std::ptr::null_mut()))?;
    let depth = overflow
        .join()
        .map_err(|_| HarnessError::invariant(NAME, "overflowing thread panicked"))??;
    Err(HarnessError::invariant(
        NAME,
        format!("recursion returned {depth} instead of faulting"),
    ))
}
