//! Replica topology monitor.
//!
//! One monitor instance owns its node list: a background thread polls every
//! known node on a fixed interval, discovers peers from reported host
//! lists, evicts nodes nobody mentions, and tracks which node is primary.
//! Caller threads only ever read snapshots.

use crate::config::DriverConfig;
use crate::topology::node::{Node, NodeView, StatusUpdate};
use crate::topology::strategy::{BalancedStrategy, StrategyError};
use crate::transport::Connector;
use fenndb_document::Document;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Monitor tunables, usually derived from [`DriverConfig`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub resolve_interval: Duration,
    pub smoothing_factor: f32,
    pub acceptable_latency_ms: f32,
    pub queue_ceiling: i32,
    pub use_queue_strategy: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&DriverConfig::default())
    }
}

impl From<&DriverConfig> for MonitorConfig {
    fn from(config: &DriverConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            resolve_interval: config.resolve_interval,
            smoothing_factor: config.smoothing_factor,
            acceptable_latency_ms: config.acceptable_latency_ms,
            queue_ceiling: config.queue_ceiling,
            use_queue_strategy: config.use_queue_strategy,
        }
    }
}

/// Tracks the live replica set: node health, roles, discovery, eviction.
pub struct ReplicaSetMonitor {
    connector: Box<dyn Connector>,
    config: MonitorConfig,
    strategy: BalancedStrategy,
    nodes: RwLock<Vec<Arc<Node>>>,
    /// Learned once; a conflicting report is a consistency error.
    set_name: RwLock<Option<String>>,
    /// Address most recently named as primary in any node's status reply.
    last_primary_signal: Mutex<Option<String>>,
    /// Size override reported by the current primary; zero until learned.
    max_document_size: AtomicUsize,
    closed: AtomicBool,
}

impl ReplicaSetMonitor {
    /// Creates a monitor seeded with the given addresses. Seeds that the
    /// connector rejects are skipped with a warning; they can still be
    /// discovered later through another node's host list.
    pub fn new(connector: Box<dyn Connector>, seeds: &[&str], config: MonitorConfig) -> Self {
        let strategy = if config.use_queue_strategy {
            BalancedStrategy::latency_and_queue_balanced(
                config.acceptable_latency_ms,
                config.queue_ceiling,
            )
        } else {
            BalancedStrategy::latency_balanced(config.acceptable_latency_ms)
        };

        let monitor = Self {
            connector,
            config,
            strategy,
            nodes: RwLock::new(Vec::new()),
            set_name: RwLock::new(None),
            last_primary_signal: Mutex::new(None),
            max_document_size: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        };
        for seed in seeds {
            monitor.add_if_absent(seed);
        }
        monitor
    }

    /// Spawns the background poll thread. The thread exits after
    /// [`close`](Self::close).
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        std::thread::Builder::new()
            .name("fenndb-topology".to_string())
            .spawn(move || monitor.run())
            .expect("spawning the topology thread cannot fail")
    }

    fn run(&self) {
        let mut next_resolve = Instant::now() + self.config.resolve_interval;
        while !self.closed.load(Ordering::SeqCst) {
            self.update_all();

            let now = Instant::now();
            if now >= next_resolve {
                next_resolve = now + self.config.resolve_interval;
                for node in self.nodes() {
                    node.refresh_address();
                }
            }

            std::thread::sleep(self.config.poll_interval);
        }
        tracing::debug!("topology thread stopped");
    }

    /// Stops the poll thread after its current cycle. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stable snapshot of the node list.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    /// Point-in-time views of every node, for selection.
    pub fn views(&self) -> Vec<NodeView> {
        self.nodes().iter().map(|n| n.view()).collect()
    }

    /// The replica set name, once any node has reported it.
    pub fn set_name(&self) -> Option<String> {
        self.set_name.read().clone()
    }

    /// Whether the monitor has learned the set identity yet.
    pub fn ready(&self) -> bool {
        self.set_name.read().is_some()
    }

    pub fn has_server_up(&self) -> bool {
        self.nodes().iter().any(|n| n.is_ok())
    }

    /// The size override reported by the last seen primary, if any.
    pub fn max_document_size(&self) -> Option<usize> {
        match self.max_document_size.load(Ordering::Relaxed) {
            0 => None,
            size => Some(size),
        }
    }

    /// Address of the current primary, if one is known.
    pub fn primary(&self) -> Option<String> {
        self.primary_node().map(|n| n.address().to_string())
    }

    pub fn primary_node(&self) -> Option<Arc<Node>> {
        self.nodes().into_iter().find(|n| n.is_primary())
    }

    /// Address of a load-balanced secondary, if one is eligible.
    pub fn secondary(&self) -> Option<String> {
        let views = self.views();
        match self.strategy.select(None, None, &views) {
            Ok(choice) => choice.map(|n| n.address.clone()),
            // unreachable without a tag filter
            Err(_) => None,
        }
    }

    /// Address of a secondary carrying the exact tag pair.
    pub fn secondary_with_tag(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<String>, StrategyError> {
        let views = self.views();
        Ok(self
            .strategy
            .select(Some(key), Some(value), &views)?
            .map(|n| n.address.clone()))
    }

    /// Tries each tag pair in document order; first match wins.
    pub fn secondary_by_tags(&self, tags: &Document) -> Option<String> {
        let views = self.views();
        self.strategy
            .select_by_tags(tags, &views)
            .ok()
            .flatten()
            .map(|n| n.address.clone())
    }

    /// Synchronous, priority-ordered primary lookup: re-check the last
    /// known primary, then the node most recently named as primary by a
    /// peer, then fall back to a full poll pass.
    pub fn ensure_primary(&self) -> Option<Arc<Node>> {
        if let Some(node) = self.primary_node() {
            if self.recheck(&node) {
                return Some(node);
            }
        }

        let signal = self.last_primary_signal.lock().clone();
        if let Some(address) = signal {
            if let Some(node) = self.find_node(&address) {
                if self.recheck(&node) {
                    return Some(node);
                }
            }
        }

        self.update_all();
        self.primary_node()
    }

    fn recheck(&self, node: &Arc<Node>) -> bool {
        let mut seen = HashSet::new();
        self.update_node(node, &mut seen);
        node.is_primary()
    }

    /// One full poll pass: poll every known node (including nodes
    /// discovered mid-pass), then evict nodes that appeared in nobody's
    /// host list. An all-silent pass evicts nothing, so a transient outage
    /// cannot empty the set.
    pub fn update_all(&self) {
        let mut seen: HashSet<String> = HashSet::new();

        let mut index = 0;
        loop {
            let node = {
                let nodes = self.nodes.read();
                match nodes.get(index) {
                    Some(node) => Arc::clone(node),
                    None => break,
                }
            };
            self.update_node(&node, &mut seen);
            index += 1;
        }

        if !seen.is_empty() {
            let mut nodes = self.nodes.write();
            nodes.retain(|node| {
                let keep = seen.contains(node.address());
                if !keep {
                    tracing::info!(
                        address = %node.address(),
                        "evicting node absent from every host list"
                    );
                }
                keep
            });
        }
    }

    fn update_node(&self, node: &Arc<Node>, seen: &mut HashSet<String>) {
        let update = match node.poll() {
            Ok(update) => update,
            Err(error) => {
                tracing::debug!(address = %node.address(), %error, "status poll failed");
                node.mark_down();
                return;
            }
        };

        // name consistency gates the whole update: on conflict the node
        // keeps its prior state and contributes nothing to this pass
        if !self.accept_set_name(node, &update) {
            return;
        }

        node.commit(&update, self.config.smoothing_factor);

        if let Some(signal) = &update.primary_signal {
            *self.last_primary_signal.lock() = Some(signal.clone());
        }

        if update.is_primary {
            let size = update
                .max_document_size
                .map(|s| s.max(0) as usize)
                .unwrap_or(fenndb_document::DEFAULT_MAX_DOCUMENT_SIZE);
            self.max_document_size.store(size, Ordering::Relaxed);
        }

        for host in &update.hosts {
            if let Some(discovered) = self.add_if_absent(host) {
                seen.insert(discovered.address().to_string());
            }
        }
    }

    fn accept_set_name(&self, node: &Arc<Node>, update: &StatusUpdate) -> bool {
        let Some(reported) = &update.set_name else {
            return true;
        };
        let mut learned = self.set_name.write();
        match &*learned {
            None => {
                tracing::info!(set_name = %reported, "learned replica set name");
                *learned = Some(reported.clone());
                true
            }
            Some(existing) if existing != reported => {
                tracing::error!(
                    address = %node.address(),
                    expected = %existing,
                    reported = %reported,
                    "replica set name mismatch; discarding node update"
                );
                false
            }
            Some(_) => true,
        }
    }

    fn find_node(&self, host: &str) -> Option<Arc<Node>> {
        let nodes = self.nodes.read();
        nodes
            .iter()
            .find(|n| n.address() == host || n.has_name(host))
            .cloned()
    }

    fn add_if_absent(&self, host: &str) -> Option<Arc<Node>> {
        if let Some(existing) = self.find_node(host) {
            return Some(existing);
        }
        match self.connector.connect(host) {
            Ok(channel) => {
                let node = Arc::new(Node::new(host, channel));
                tracing::info!(address = %host, "discovered node");
                self.nodes.write().push(Arc::clone(&node));
                Some(node)
            }
            Err(error) => {
                tracing::warn!(address = %host, %error, "could not open channel to host");
                None
            }
        }
    }
}
