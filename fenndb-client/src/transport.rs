//! Transport seams.
//!
//! The driver core does not open sockets. The embedding application (or a
//! companion transport crate) supplies two primitives: a byte-level message
//! channel and an administrative command runner. Timeouts belong to the
//! transport; the core treats a timeout as an ordinary failure.

use fenndb_document::Document;
use thiserror::Error;

/// Errors surfaced by transport implementations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timeout")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("command failed: {0}")]
    Command(String),
}

/// A bidirectional message channel to one server.
pub trait Connection: Send + Sync {
    /// Fires a wire message without waiting for a reply.
    fn send(&self, message: &[u8]) -> Result<(), ChannelError>;

    /// Sends a wire message and returns the reply body: the reply header
    /// onward, with the outer message header already stripped.
    fn send_receive(&self, message: &[u8]) -> Result<Vec<u8>, ChannelError>;

    /// Runs an administrative command and returns its reply document.
    fn run_command(&self, command: &Document) -> Result<Document, ChannelError>;
}

/// Opens per-node channels for the topology monitor. Each monitored node
/// owns its own channel so its socket options and timeouts stay
/// independent of the operation pool.
pub trait Connector: Send + Sync {
    fn connect(&self, address: &str) -> Result<Box<dyn NodeChannel>, ChannelError>;
}

/// A monitor-owned channel to one node.
pub trait NodeChannel: Send + Sync {
    fn run_command(&self, command: &Document) -> Result<Document, ChannelError>;

    /// Re-resolves the node's address. Returns true if it changed.
    fn refresh_address(&self) -> Result<bool, ChannelError> {
        Ok(false)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use bytes::BufMut;
    use fenndb_document::{Encoder, DEFAULT_MAX_DOCUMENT_SIZE};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Scripted in-memory connection: records sent messages, pops queued
    /// reply bodies and command replies.
    #[derive(Default)]
    pub struct MockConnection {
        pub sent: Mutex<Vec<Vec<u8>>>,
        pub replies: Mutex<VecDeque<Vec<u8>>>,
        pub command_replies: Mutex<VecDeque<Document>>,
        pub commands: Mutex<Vec<Document>>,
        pub fail_sends: AtomicBool,
    }

    impl MockConnection {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn queue_reply(&self, body: Vec<u8>) {
            self.replies.lock().push_back(body);
        }

        pub fn queue_command_reply(&self, doc: Document) {
            self.command_replies.lock().push_back(doc);
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    impl Connection for MockConnection {
        fn send(&self, message: &[u8]) -> Result<(), ChannelError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(ChannelError::ConnectionClosed);
            }
            self.sent.lock().push(message.to_vec());
            Ok(())
        }

        fn send_receive(&self, message: &[u8]) -> Result<Vec<u8>, ChannelError> {
            self.sent.lock().push(message.to_vec());
            self.replies
                .lock()
                .pop_front()
                .ok_or(ChannelError::ConnectionClosed)
        }

        fn run_command(&self, command: &Document) -> Result<Document, ChannelError> {
            self.commands.lock().push(command.clone());
            self.command_replies
                .lock()
                .pop_front()
                .ok_or(ChannelError::ConnectionClosed)
        }
    }

    /// Builds a reply body: reply header plus encoded documents.
    pub fn reply_body(flags: i32, cursor_id: i64, docs: &[Document]) -> Vec<u8> {
        let mut body = Vec::new();
        body.put_i32_le(flags);
        body.put_i64_le(cursor_id);
        body.put_i32_le(0);
        body.put_i32_le(docs.len() as i32);
        let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
        for doc in docs {
            enc.encode_document(doc).unwrap();
        }
        body.extend_from_slice(enc.finish());
        body
    }
}
