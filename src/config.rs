use std::env;

use log::warn;

/// Environment variable overriding the per-thread buffer capacity.
pub const BUFFER_SIZE_VAR: &str = "TRACER_BUFFER_SIZE";
/// Environment variable overriding the per-kind record pool capacity.
pub const POOL_SIZE_VAR: &str = "TRACER_POOL_SIZE";

const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024;
const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Sizing knobs of the tracer. Simple parameters, deliberately small: pool
/// size per kind and buffer capacity per thread. The sink choice is made by
/// whatever the embedder passes to [`Tracer::new`](crate::Tracer::new).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TracerConfig {
    /// Records a thread buffers before a flush is forced.
    pub buffer_capacity: usize,
    /// Preallocated records per kind. Sized so exhaustion does not occur
    /// under normal load; repeated exhaustion is fatal.
    pub pool_capacity: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl TracerConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(size) = read_size(BUFFER_SIZE_VAR) {
            config.buffer_capacity = size;
        }
        if let Some(size) = read_size(POOL_SIZE_VAR) {
            config.pool_capacity = size;
        }
        config
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be positive");
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "pool capacity must be positive");
        self.pool_capacity = capacity;
        self
    }
}

fn read_size(var: &str) -> Option<usize> {
    let raw = env::var(var).ok()?;
    match raw.parse::<usize>() {
        Ok(size) if size > 0 => Some(size),
        _ => {
            warn!("ignoring {var}={raw}: expected a positive integer");
            None
        }
    }
}
