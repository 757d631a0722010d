//! Replica topology tracking and read-target selection.

pub mod monitor;
pub mod node;
pub mod strategy;

pub use monitor::{MonitorConfig, ReplicaSetMonitor};
pub use node::{Node, NodeView};
pub use strategy::{
    BalancedStrategy, SelectableNode, StrategyError, DEFAULT_ACCEPTABLE_LATENCY_MS,
    DEFAULT_QUEUE_CEILING,
};
