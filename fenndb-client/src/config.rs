//! Driver tunables.
//!
//! Configuration starts from defaults and applies `FENNDB_*` environment
//! variable overrides; the driver is a library, so there is no config file
//! layer.

use crate::topology::strategy::{DEFAULT_ACCEPTABLE_LATENCY_MS, DEFAULT_QUEUE_CEILING};
use fenndb_document::{pool, PoolConfig, DEFAULT_MAX_DOCUMENT_SIZE};
use std::str::FromStr;
use std::time::Duration;

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Interval between topology poll passes.
    pub poll_interval: Duration,
    /// Latency spread inside which secondaries are considered equivalent.
    pub acceptable_latency_ms: f32,
    /// Interval between node address re-resolutions.
    pub resolve_interval: Duration,
    /// Exponential smoothing factor for per-node ping times.
    pub smoothing_factor: f32,
    /// Maximum encoded document size.
    pub max_document_size: usize,
    /// Per-host connection limit; also caps the encoder pool.
    pub connections_per_host: usize,
    /// Memory budget backing the encoder pool.
    pub memory_budget: usize,
    /// Bounded wait for a pooled encoder.
    pub checkout_timeout: Duration,
    /// Queue depth past which a secondary is skipped (queue strategy only).
    pub queue_ceiling: i32,
    /// Whether secondary selection also weighs server queue depth.
    pub use_queue_strategy: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            acceptable_latency_ms: DEFAULT_ACCEPTABLE_LATENCY_MS,
            resolve_interval: Duration::from_millis(300_000),
            smoothing_factor: 4.0,
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
            connections_per_host: pool::DEFAULT_CONNECTIONS_PER_HOST,
            memory_budget: pool::DEFAULT_MEMORY_BUDGET,
            checkout_timeout: pool::DEFAULT_CHECKOUT_TIMEOUT,
            queue_ceiling: DEFAULT_QUEUE_CEILING,
            use_queue_strategy: false,
        }
    }
}

impl DriverConfig {
    /// Loads defaults, then environment variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(ms) = env_parse::<u64>("FENNDB_POLL_INTERVAL_MS") {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<f32>("FENNDB_ACCEPTABLE_LATENCY_MS") {
            self.acceptable_latency_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("FENNDB_RESOLVE_INTERVAL_MS") {
            self.resolve_interval = Duration::from_millis(ms);
        }
        if let Some(factor) = env_parse::<f32>("FENNDB_SMOOTHING_FACTOR") {
            self.smoothing_factor = factor;
        }
        if let Some(size) = env_parse::<usize>("FENNDB_MAX_DOCUMENT_SIZE") {
            self.max_document_size = size;
        }
        if let Some(limit) = env_parse::<usize>("FENNDB_CONNECTIONS_PER_HOST") {
            self.connections_per_host = limit;
        }
        if let Some(budget) = env_parse::<usize>("FENNDB_MEMORY_BUDGET") {
            self.memory_budget = budget;
        }
        if let Some(ms) = env_parse::<u64>("FENNDB_CHECKOUT_TIMEOUT_MS") {
            self.checkout_timeout = Duration::from_millis(ms);
        }
        if let Some(ceiling) = env_parse::<i32>("FENNDB_QUEUE_CEILING") {
            self.queue_ceiling = ceiling;
        }
        if let Some(enabled) = env_parse::<bool>("FENNDB_QUEUE_STRATEGY") {
            self.use_queue_strategy = enabled;
        }
    }

    /// Encoder pool parameters derived from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_document_size: self.max_document_size,
            memory_budget: self.memory_budget,
            connections_per_host: self.connections_per_host,
            checkout_timeout: self.checkout_timeout,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_document_size(mut self, size: usize) -> Self {
        self.max_document_size = size;
        self
    }

    pub fn with_queue_strategy(mut self, ceiling: i32) -> Self {
        self.use_queue_strategy = true;
        self.queue_ceiling = ceiling;
        self
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(name, raw = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
