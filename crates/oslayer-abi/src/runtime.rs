//! Process-scoped entity pool behind the C entry points.
//!
//! The pool is built once from [`LayerConfig::from_env`] on the first call
//! to [`os_init`] or to any entry point, whichever comes first, and lives
//! for the rest of the process.

use std::sync::{Arc, OnceLock};

use oslayer_core::{EntityPool, LayerConfig};

static POOL: OnceLock<Arc<EntityPool>> = OnceLock::new();

/// The process pool, creating it from the environment on first use.
pub fn pool() -> &'static Arc<EntityPool> {
    POOL.get_or_init(|| {
        let config = LayerConfig::from_env();
        tracing::debug!(capacity = config.entity_capacity, "initializing oslayer runtime");
        Arc::new(EntityPool::from_config(config))
    })
}

/// Resolve the process pool eagerly. Calling it more than once is harmless.
#[unsafe(no_mangle)]
pub extern "C" fn os_init() {
    let pool = pool();
    tracing::debug!(capacity = pool.capacity(), "os_init");
}
