//! Collection operations: insert, update, remove, find, kill-cursors.
//!
//! Every mutating operation under an acknowledged write concern is followed
//! by a last-error command on the same connection; the server's reply is
//! translated into success or a classified write failure. Unacknowledged
//! writes are fired without waiting.

use crate::cursor::{Cursor, DeadCursorReaper};
use crate::error::{ClientError, WriteErrorKind};
use crate::transport::Connection;
use fenndb_document::{doc, Document, EncoderPool, Value};
use fenndb_protocol::{message, parse_reply, QueryOptions, Reply};
use std::sync::Arc;

/// Required acknowledgment level for mutating operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteConcern {
    /// Fire the message and do not wait for a server verdict.
    Unacknowledged,
    /// Confirm every message with a last-error round trip.
    #[default]
    Acknowledged,
}

/// Handle to one namespace over a shared connection and encoder pool.
pub struct Collection {
    conn: Arc<dyn Connection>,
    pool: Arc<EncoderPool>,
    reaper: Arc<DeadCursorReaper>,
    namespace: String,
    write_concern: WriteConcern,
}

impl Collection {
    pub fn new(
        conn: Arc<dyn Connection>,
        pool: Arc<EncoderPool>,
        namespace: impl Into<String>,
    ) -> Self {
        let reaper = Arc::new(DeadCursorReaper::new(conn.clone(), pool.clone()));
        Self {
            conn,
            pool,
            reaper,
            namespace: namespace.into(),
            write_concern: WriteConcern::default(),
        }
    }

    pub fn with_write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = write_concern;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn write_concern(&self) -> WriteConcern {
        self.write_concern
    }

    pub fn reaper(&self) -> &Arc<DeadCursorReaper> {
        &self.reaper
    }

    /// Inserts documents. A batch that does not fit one wire message is
    /// split across several, each acknowledged independently under the
    /// active write concern.
    pub fn insert(&self, docs: &[Document]) -> Result<(), ClientError> {
        if docs.is_empty() {
            return Ok(());
        }
        let mut cur = 0;
        while cur < docs.len() {
            cur = self.pool.with(|enc| -> Result<usize, ClientError> {
                let msg = message::build_insert(enc, &self.namespace, docs, cur)?;
                tracing::debug!(
                    namespace = %self.namespace,
                    request_id = msg.request_id,
                    count = msg.next_index - cur,
                    "insert"
                );
                self.say(enc.finish())?;
                Ok(msg.next_index)
            })?;
        }
        Ok(())
    }

    pub fn update(
        &self,
        filter: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
    ) -> Result<(), ClientError> {
        self.pool.with(|enc| -> Result<(), ClientError> {
            let request_id =
                message::build_update(enc, &self.namespace, filter, update, upsert, multi)?;
            tracing::debug!(namespace = %self.namespace, request_id, upsert, multi, "update");
            self.say(enc.finish())
        })
    }

    pub fn remove(&self, filter: &Document) -> Result<(), ClientError> {
        self.pool.with(|enc| -> Result<(), ClientError> {
            let request_id = message::build_delete(enc, &self.namespace, filter)?;
            tracing::debug!(namespace = %self.namespace, request_id, "remove");
            self.say(enc.finish())
        })
    }

    /// Runs a query and returns a cursor over its results. The cursor is
    /// returned even when the first batch is empty, so tailable queries
    /// can keep polling.
    pub fn find(
        &self,
        filter: Option<&Document>,
        projection: Option<&Document>,
        skip: i32,
        batch_size: i32,
        options: QueryOptions,
    ) -> Result<Cursor, ClientError> {
        // opportunistic cleanup of abandoned cursors, batched elsewhere
        self.reaper.maybe_flush();

        let empty = Document::new();
        let filter = filter.unwrap_or(&empty);
        let reply = self.pool.with(|enc| -> Result<Reply, ClientError> {
            let request_id = message::build_query(
                enc,
                &self.namespace,
                options,
                skip,
                batch_size,
                filter,
                projection,
            )?;
            tracing::debug!(namespace = %self.namespace, request_id, skip, batch_size, "query");
            let body = self.conn.send_receive(enc.finish())?;
            Ok(parse_reply(&body)?)
        })?;

        Cursor::new(
            Arc::clone(&self.conn),
            Arc::clone(&self.pool),
            Arc::clone(&self.reaper),
            self.namespace.clone(),
            batch_size,
            options,
            reply,
        )
    }

    /// Explicitly kills remote cursors, bypassing the reaper's batching.
    pub fn kill_cursors(&self, cursor_ids: &[i64]) -> Result<(), ClientError> {
        if cursor_ids.is_empty() {
            return Ok(());
        }
        self.pool.with(|enc| -> Result<(), ClientError> {
            message::build_kill_cursors(enc, cursor_ids)?;
            self.conn.send(enc.finish())?;
            Ok(())
        })
    }

    fn say(&self, message: &[u8]) -> Result<(), ClientError> {
        self.conn.send(message)?;
        match self.write_concern {
            WriteConcern::Unacknowledged => Ok(()),
            WriteConcern::Acknowledged => self.check_last_error(),
        }
    }

    fn check_last_error(&self) -> Result<(), ClientError> {
        let reply = self.conn.run_command(&doc! { "getlasterror" => 1 })?;
        match reply.get("err") {
            None | Some(Value::Null) => Ok(()),
            Some(value) => match value.as_str() {
                Some(message) => {
                    let code = reply.get_i32("code");
                    Err(ClientError::WriteFailure {
                        message: message.to_string(),
                        code,
                        kind: classify_write_error(message, code),
                    })
                }
                None => Ok(()),
            },
        }
    }
}

fn classify_write_error(message: &str, code: Option<i32>) -> WriteErrorKind {
    match code {
        Some(11000) | Some(11001) => WriteErrorKind::DuplicateKey,
        _ if message.contains("duplicate key")
            || message.contains("E11000")
            || message.contains("E11001") =>
        {
            WriteErrorKind::DuplicateKey
        }
        _ => WriteErrorKind::Other,
    }
}
