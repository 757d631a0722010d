//! # fenndb
//!
//! Client driver core for the fenndb document database wire protocol:
//! the binary document codec, the cursor/message protocol layer, and the
//! replica-topology monitor. Socket transports, authentication, and
//! higher-level query builders live outside this crate behind the
//! [`fenndb_client::transport`] traits.
//!
//! ```
//! use fenndb::{doc, Document};
//!
//! let filter = doc! { "kind" => "sensor", "active" => true };
//! assert_eq!(filter.get_str("kind"), Some("sensor"));
//! ```

pub use fenndb_client::{
    BalancedStrategy, ChannelError, ClientError, Collection, Connection, Connector, Cursor,
    DeadCursorReaper, DriverConfig, MonitorConfig, Node, NodeChannel, NodeView,
    ReplicaSetMonitor, SelectableNode, StrategyError, WriteConcern, WriteErrorKind,
};
pub use fenndb_document::{
    decode_document, doc, DecodeError, Document, EncodeError, Encoder, EncoderPool, PoolConfig,
    PoolError, Value, DEFAULT_MAX_DOCUMENT_SIZE,
};
pub use fenndb_protocol::{
    parse_reply, OpCode, ProtocolError, QueryOptions, Reply, ReplyFlags, MESSAGE_HEADER_SIZE,
};

pub use fenndb_client as client;
pub use fenndb_document as document;
pub use fenndb_protocol as protocol;
