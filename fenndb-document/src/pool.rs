//! Bounded encoder pool with scoped checkout.
//!
//! Encoders are large (max document size plus slack) so the pool is sized
//! from a memory budget and capped by the per-host connection limit. A
//! checkout that cannot be satisfied within the bounded wait fails instead
//! of blocking forever.

use crate::encode::Encoder;
use crate::error::PoolError;
use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

/// Default per-host connection limit, which also caps the pool size.
pub const DEFAULT_CONNECTIONS_PER_HOST: usize = 10;

/// Default memory budget backing the encoder buffers (512 MiB).
pub const DEFAULT_MEMORY_BUDGET: usize = 512 * 1024 * 1024;

/// Default bounded wait for a free encoder.
pub const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(60);

/// Pool sizing and checkout parameters.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_document_size: usize,
    pub memory_budget: usize,
    pub connections_per_host: usize,
    pub checkout_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_document_size: crate::DEFAULT_MAX_DOCUMENT_SIZE,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            connections_per_host: DEFAULT_CONNECTIONS_PER_HOST,
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Number of encoders the configuration can back: a fifth of the
    /// budgeted buffer count, capped at the connection limit. Zero means
    /// the configuration cannot run at all.
    fn derived_size(&self) -> usize {
        let buffers = self.memory_budget / self.max_document_size / 5;
        buffers.min(self.connections_per_host)
    }
}

/// A shared pool of [`Encoder`]s.
pub struct EncoderPool {
    idle: Mutex<Vec<Encoder>>,
    available: Condvar,
    size: usize,
    checkout_timeout: Duration,
}

impl EncoderPool {
    /// Fails fast when the memory budget cannot back a single encoder.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let size = config.derived_size();
        if size == 0 {
            return Err(PoolError::NoCapacity);
        }
        tracing::debug!(size, max = config.max_document_size, "creating encoder pool");
        let idle = (0..size)
            .map(|_| Encoder::new(config.max_document_size))
            .collect();
        Ok(Self {
            idle: Mutex::new(idle),
            available: Condvar::new(),
            size,
            checkout_timeout: config.checkout_timeout,
        })
    }

    /// Total number of encoders owned by the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of encoders currently idle.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Checks out an encoder, blocking up to the configured wait. The
    /// returned guard resets the encoder and returns it on drop, so the
    /// buffer cannot leak on any exit path.
    pub fn checkout(&self) -> Result<EncoderGuard<'_>, PoolError> {
        let deadline = Instant::now() + self.checkout_timeout;
        let mut idle = self.idle.lock();
        loop {
            if let Some(encoder) = idle.pop() {
                return Ok(EncoderGuard {
                    pool: self,
                    encoder: Some(encoder),
                });
            }
            let timeout = deadline.saturating_duration_since(Instant::now());
            if timeout.is_zero() || self.available.wait_for(&mut idle, timeout).timed_out() {
                if let Some(encoder) = idle.pop() {
                    return Ok(EncoderGuard {
                        pool: self,
                        encoder: Some(encoder),
                    });
                }
                return Err(PoolError::Exhausted(self.checkout_timeout));
            }
        }
    }

    /// Runs `f` with a checked-out encoder.
    pub fn with<R, E>(&self, f: impl FnOnce(&mut Encoder) -> Result<R, E>) -> Result<R, E>
    where
        E: From<PoolError>,
    {
        let mut guard = self.checkout().map_err(E::from)?;
        f(&mut guard)
    }

    fn give_back(&self, mut encoder: Encoder) {
        encoder.reset();
        self.idle.lock().push(encoder);
        self.available.notify_one();
    }
}

/// Scoped checkout of one encoder; see [`EncoderPool::checkout`].
pub struct EncoderGuard<'a> {
    pool: &'a EncoderPool,
    encoder: Option<Encoder>,
}

impl Deref for EncoderGuard<'_> {
    type Target = Encoder;

    fn deref(&self) -> &Encoder {
        self.encoder.as_ref().expect("encoder present until drop")
    }
}

impl DerefMut for EncoderGuard<'_> {
    fn deref_mut(&mut self) -> &mut Encoder {
        self.encoder.as_mut().expect("encoder present until drop")
    }
}

impl Drop for EncoderGuard<'_> {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.pool.give_back(encoder);
        }
    }
}
