//! Per-node state tracked by the topology monitor.
//!
//! The monitor thread is the only mutator; caller threads read snapshots.
//! Each node has its own critical section, so updating one node never
//! blocks inspection of another.

use crate::topology::strategy::SelectableNode;
use crate::transport::{ChannelError, NodeChannel};
use fenndb_document::{doc, Document};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Mutable health state for one node.
#[derive(Debug, Clone, Default)]
struct NodeState {
    ok: bool,
    is_primary: bool,
    is_secondary: bool,
    ping_ms: f32,
    queue_size: i32,
    tags: HashMap<String, String>,
    last_check: Option<Instant>,
}

/// A known replica node.
pub struct Node {
    address: String,
    names: Mutex<HashSet<String>>,
    channel: Box<dyn NodeChannel>,
    state: Mutex<NodeState>,
}

/// Point-in-time copy of one node's state for selection. Fields are
/// individually consistent; the record as a whole is not versioned.
#[derive(Debug, Clone)]
pub struct NodeView {
    pub address: String,
    pub ok: bool,
    pub primary: bool,
    pub secondary: bool,
    pub ping_ms: f32,
    pub queue_size: i32,
    pub tags: HashMap<String, String>,
}

impl NodeView {
    pub fn is_primary(&self) -> bool {
        self.ok && self.primary
    }

    pub fn is_secondary(&self) -> bool {
        self.ok && self.secondary
    }
}

impl SelectableNode for NodeView {
    fn secondary(&self) -> bool {
        self.is_secondary()
    }

    fn check_tag(&self, key: &str, value: &str) -> bool {
        self.tags.get(key).is_some_and(|v| v == value)
    }

    fn ping_time(&self) -> f32 {
        self.ping_ms
    }

    fn queue_size(&self) -> i32 {
        self.queue_size
    }
}

/// Everything one successful status poll reported, parsed up front so a
/// rejected update (set-name conflict) leaves the node untouched.
#[derive(Debug, Default)]
pub(crate) struct StatusUpdate {
    pub ping_sample: f32,
    pub is_primary: bool,
    pub is_secondary: bool,
    pub primary_signal: Option<String>,
    pub hosts: Vec<String>,
    pub tags: HashMap<String, String>,
    pub set_name: Option<String>,
    pub max_document_size: Option<i32>,
    pub queue_size: Option<i32>,
}

impl StatusUpdate {
    pub(crate) fn parse(reply: &Document, ping_sample: f32) -> Self {
        let mut update = StatusUpdate {
            ping_sample,
            ..StatusUpdate::default()
        };

        match reply.get_document("repl") {
            // no replication section: a standalone server, treated as primary
            None => update.is_primary = true,
            Some(repl) => {
                update.is_primary = repl.get_bool("ismaster").unwrap_or(false);
                update.is_secondary = repl.get_bool("secondary").unwrap_or(false);
                update.primary_signal = repl.get_str("primary").map(str::to_string);
                update.set_name = repl.get_str("setName").map(str::to_string);

                for list in ["hosts", "passives"] {
                    if let Some(entries) = repl.get_array(list) {
                        for entry in entries {
                            if let Some(host) = entry.as_str() {
                                update.hosts.push(host.to_string());
                            }
                        }
                    }
                }

                if let Some(tags) = repl.get_document("tags") {
                    for (key, value) in tags.iter() {
                        if let Some(value) = value.as_str() {
                            update.tags.insert(key.to_string(), value.to_string());
                        }
                    }
                }

                if update.is_primary {
                    update.max_document_size = repl.get_i32("maxBsonObjectSize");
                }
            }
        }

        update.queue_size = reply
            .get_document("globalLock")
            .and_then(|gl| gl.get_document("currentQueue"))
            .and_then(|q| q.get_i32("total"));

        update
    }
}

impl Node {
    pub fn new(address: impl Into<String>, channel: Box<dyn NodeChannel>) -> Self {
        let address = address.into();
        let mut names = HashSet::new();
        names.insert(address.clone());
        Self {
            address,
            names: Mutex::new(names),
            channel,
            state: Mutex::new(NodeState::default()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.lock().contains(name)
    }

    pub fn add_name(&self, name: impl Into<String>) {
        self.names.lock().insert(name.into());
    }

    /// Runs the status command against this node, timing the round trip.
    pub(crate) fn poll(&self) -> Result<StatusUpdate, ChannelError> {
        let start = Instant::now();
        let reply = self.channel.run_command(&doc! { "serverStatus" => 1 })?;
        let ping_sample = start.elapsed().as_secs_f32() * 1000.0;
        Ok(StatusUpdate::parse(&reply, ping_sample))
    }

    /// Applies a parsed update under this node's own critical section.
    pub(crate) fn commit(&self, update: &StatusUpdate, smoothing_factor: f32) {
        let mut state = self.state.lock();

        if !state.ok {
            tracing::info!(address = %self.address, "server seen up");
        }

        if state.last_check.is_none() {
            state.ping_ms = update.ping_sample;
        } else {
            state.ping_ms += (update.ping_sample - state.ping_ms) / smoothing_factor;
        }
        tracing::debug!(
            address = %self.address,
            sample = update.ping_sample,
            smoothed = state.ping_ms,
            "latency"
        );
        state.last_check = Some(Instant::now());

        state.ok = true;
        state.is_primary = update.is_primary;
        state.is_secondary = update.is_secondary;
        if let Some(queue) = update.queue_size {
            state.queue_size = queue;
        }
        // last write wins per key; existing tags are kept
        for (key, value) in &update.tags {
            state.tags.insert(key.clone(), value.clone());
        }
    }

    /// Marks the node down, keeping it in the set for future polls.
    pub(crate) fn mark_down(&self) {
        let mut state = self.state.lock();
        if state.ok {
            tracing::warn!(address = %self.address, "server seen down");
        }
        state.ok = false;
    }

    /// Asks the transport to re-resolve this node's address.
    pub(crate) fn refresh_address(&self) {
        match self.channel.refresh_address() {
            Ok(true) => tracing::info!(address = %self.address, "node address changed"),
            Ok(false) => {}
            Err(error) => {
                tracing::warn!(address = %self.address, %error, "address refresh failed")
            }
        }
    }

    pub fn is_primary(&self) -> bool {
        let state = self.state.lock();
        state.ok && state.is_primary
    }

    pub fn is_secondary(&self) -> bool {
        let state = self.state.lock();
        state.ok && state.is_secondary
    }

    pub fn is_ok(&self) -> bool {
        self.state.lock().ok
    }

    pub fn ping_ms(&self) -> f32 {
        self.state.lock().ping_ms
    }

    /// True iff the node's tag mapping contains `key` mapped to `value`.
    pub fn check_tag(&self, key: &str, value: &str) -> bool {
        self.state.lock().tags.get(key).is_some_and(|v| v == value)
    }

    pub fn view(&self) -> NodeView {
        let state = self.state.lock();
        NodeView {
            address: self.address.clone(),
            ok: state.ok,
            primary: state.is_primary,
            secondary: state.is_secondary,
            ping_ms: state.ping_ms,
            queue_size: state.queue_size,
            tags: state.tags.clone(),
        }
    }
}
