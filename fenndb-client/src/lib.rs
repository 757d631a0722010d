//! # fenndb-client
//!
//! Client driver core for fenndb.
//!
//! This crate provides:
//! - Collection operations (insert, update, remove, find) with write
//!   concern handling
//! - A lazy [`Cursor`] over multi-batch query results, with batched
//!   cleanup of abandoned remote cursors
//! - A background [`ReplicaSetMonitor`](topology::ReplicaSetMonitor)
//!   tracking node health, roles, and tags
//! - Latency- and load-balanced secondary selection
//!
//! Sockets are out of scope: the embedding application supplies the
//! [`transport`] traits.

pub mod config;
pub mod cursor;
pub mod error;
pub mod ops;
pub mod topology;
pub mod transport;

pub use config::DriverConfig;
pub use cursor::{Cursor, DeadCursorReaper};
pub use error::{ClientError, WriteErrorKind};
pub use ops::{Collection, WriteConcern};
pub use topology::{
    BalancedStrategy, MonitorConfig, Node, NodeView, ReplicaSetMonitor, SelectableNode,
    StrategyError,
};
pub use transport::{ChannelError, Connection, Connector, NodeChannel};
