//! Layer configuration.
//!
//! The entity pool is sized once, at process start, from the environment:
//! - `OSLAYER_ENTITY_CAPACITY`: number of pooled entities (default 1024).
//!   Values outside `1..=MAX_ENTITY_CAPACITY` or that fail to parse fall back
//!   to the default rather than refusing to start.
//! - `OSLAYER_THREAD_NAME`: optional prefix for launched threads; each thread
//!   is named `<prefix>-<slot index>`.
//! - `OSLAYER_THREAD_STACK`: optional stack size in bytes for launched threads.

/// Default number of pooled entities.
pub const DEFAULT_ENTITY_CAPACITY: usize = 1024;

/// Upper bound on the pool size. Keeps `slot index + 1` inside the low half
/// of a [`Handle`](crate::Handle).
pub const MAX_ENTITY_CAPACITY: usize = 1 << 20;

/// Smallest stack size accepted from `OSLAYER_THREAD_STACK`.
pub const MIN_THREAD_STACK: usize = 16 * 1024;

pub const ENV_ENTITY_CAPACITY: &str = "OSLAYER_ENTITY_CAPACITY";
pub const ENV_THREAD_NAME: &str = "OSLAYER_THREAD_NAME";
pub const ENV_THREAD_STACK: &str = "OSLAYER_THREAD_STACK";

/// Process-level settings for one entity pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerConfig {
    /// Fixed number of entities; exhaustion is fatal.
    pub entity_capacity: usize,
    /// Name prefix for launched threads (`None` leaves threads unnamed).
    pub thread_name_prefix: Option<String>,
    /// Stack size for launched threads (`None` uses the std default).
    pub thread_stack_size: Option<usize>,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            entity_capacity: DEFAULT_ENTITY_CAPACITY,
            thread_name_prefix: None,
            thread_stack_size: None,
        }
    }
}

impl LayerConfig {
    /// Resolve the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the configuration through an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let entity_capacity = lookup(ENV_ENTITY_CAPACITY)
            .map(|raw| parse_capacity(&raw))
            .unwrap_or(DEFAULT_ENTITY_CAPACITY);
        let thread_name_prefix = lookup(ENV_THREAD_NAME)
            .map(|raw| raw.trim().to_string())
            .filter(|prefix| !prefix.is_empty());
        let thread_stack_size = lookup(ENV_THREAD_STACK).and_then(|raw| parse_stack_size(&raw));
        Self {
            entity_capacity,
            thread_name_prefix,
            thread_stack_size,
        }
    }

    /// Override the pool capacity, clamped to the supported range.
    #[must_use]
    pub fn with_entity_capacity(mut self, capacity: usize) -> Self {
        self.entity_capacity = capacity.clamp(1, MAX_ENTITY_CAPACITY);
        self
    }

    /// Override the launched-thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = Some(prefix.into());
        self
    }
}

fn parse_capacity(raw: &str) -> usize {
    match raw.trim().parse::<usize>() {
        Ok(n) if (1..=MAX_ENTITY_CAPACITY).contains(&n) => n,
        _ => DEFAULT_ENTITY_CAPACITY,
    }
}

fn parse_stack_size(raw: &str) -> Option<usize> {
    raw.trim()
        .parse::<usize>()
        .ok()
        .filter(|&bytes| bytes >= MIN_THREAD_STACK)
}
