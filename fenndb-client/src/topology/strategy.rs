//! Secondary selection.
//!
//! A single randomized strategy spreads read load across secondaries whose
//! latencies sit within an acceptable window, instead of pinning every read
//! to the single lowest-latency node. An optional queue ceiling also skips
//! secondaries that report themselves busy.

use fenndb_document::Document;
use rand::Rng;
use thiserror::Error;

/// Default acceptable spread between the best and a candidate secondary.
pub const DEFAULT_ACCEPTABLE_LATENCY_MS: f32 = 15.0;

/// Default queue depth past which a secondary is skipped.
pub const DEFAULT_QUEUE_CEILING: i32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StrategyError {
    #[error("tag key and value must both be set or both be absent")]
    InconsistentTag,
}

/// What selection needs to know about a candidate node.
pub trait SelectableNode {
    fn secondary(&self) -> bool;
    fn check_tag(&self, key: &str, value: &str) -> bool;
    fn ping_time(&self) -> f32;
    fn queue_size(&self) -> i32;
}

/// Latency-window balanced selection with an optional queue ceiling.
#[derive(Debug, Clone)]
pub struct BalancedStrategy {
    acceptable_latency_ms: f32,
    max_queue_size: Option<i32>,
}

impl BalancedStrategy {
    /// Balances on smoothed latency alone.
    pub fn latency_balanced(acceptable_latency_ms: f32) -> Self {
        Self {
            acceptable_latency_ms,
            max_queue_size: None,
        }
    }

    /// Balances on latency and skips secondaries whose reported queue
    /// depth exceeds `max_queue_size`.
    pub fn latency_and_queue_balanced(acceptable_latency_ms: f32, max_queue_size: i32) -> Self {
        Self {
            acceptable_latency_ms,
            max_queue_size: Some(max_queue_size),
        }
    }

    /// Picks one eligible secondary, or `None` when nothing qualifies.
    /// Providing exactly one of `tag_key`/`tag_value` is an error.
    ///
    /// The walk starts at a random index and wraps once. Skipped nodes
    /// (non-secondaries, tag mismatches, queued-up nodes) accumulate a
    /// "bad" count; a later eligible node replaces the current best when
    /// it is clearly faster, or probabilistically when the best sits
    /// behind many skipped candidates and the latency difference stays
    /// inside the acceptable window.
    pub fn select<'a, N: SelectableNode>(
        &self,
        tag_key: Option<&str>,
        tag_value: Option<&str>,
        nodes: &'a [N],
    ) -> Result<Option<&'a N>, StrategyError> {
        if tag_key.is_some() != tag_value.is_some() {
            return Err(StrategyError::InconsistentTag);
        }
        if nodes.is_empty() {
            return Ok(None);
        }

        let mut rng = rand::thread_rng();
        let count = nodes.len();
        let start = rng.gen_range(0..count);

        let mut best: Option<&N> = None;
        let mut bad_before_best = 0.0f64;
        let mut my_bad = 0.0f64;

        for i in 0..count {
            let node = &nodes[(start + i) % count];

            if !node.secondary() {
                my_bad += 1.0;
                continue;
            }
            if let (Some(key), Some(value)) = (tag_key, tag_value) {
                if !node.check_tag(key, value) {
                    my_bad += 1.0;
                    continue;
                }
            }
            if let Some(ceiling) = self.max_queue_size {
                if node.queue_size() > ceiling {
                    tracing::debug!(queue = node.queue_size(), "skipping queued secondary");
                    my_bad += 1.0;
                    continue;
                }
            }

            let current = match best {
                None => {
                    best = Some(node);
                    bad_before_best = my_bad;
                    my_bad = 0.0;
                    continue;
                }
                Some(current) => current,
            };

            let diff = current.ping_time() - node.ping_time();
            let ratio = (bad_before_best - my_bad) / (count as f64 - 1.0);
            if diff > self.acceptable_latency_ms
                || (ratio > rng.gen::<f64>() && diff > -self.acceptable_latency_ms)
            {
                best = Some(node);
                bad_before_best = my_bad;
                my_bad = 0.0;
            }
        }

        Ok(best)
    }

    /// Retries selection per tag pair in document order; the first pair
    /// with a match wins.
    pub fn select_by_tags<'a, N: SelectableNode>(
        &self,
        tags: &Document,
        nodes: &'a [N],
    ) -> Result<Option<&'a N>, StrategyError> {
        for (key, value) in tags.iter() {
            if let Some(value) = value.as_str() {
                if let Some(found) = self.select(Some(key), Some(value), nodes)? {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }
}

impl Default for BalancedStrategy {
    fn default() -> Self {
        Self::latency_balanced(DEFAULT_ACCEPTABLE_LATENCY_MS)
    }
}
