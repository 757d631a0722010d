//! Lazy, forward-only iteration over query results.
//!
//! A cursor drains one reply batch at a time, issuing get-more messages at
//! batch boundaries. Abandoning a cursor with a live remote handle does not
//! send anything by itself: the handle is queued on the [`DeadCursorReaper`]
//! and killed in batches to bound request volume.

use crate::error::ClientError;
use crate::transport::Connection;
use fenndb_document::{Document, EncoderPool};
use fenndb_protocol::{message, parse_reply, QueryOptions, Reply, ReplyFlags};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Key carrying a server-side failure in a single-document reply.
const ERROR_KEY: &str = "$err";

/// Pause before re-polling a tailable cursor whose server is not
/// await-capable. A fixed delay, so this branch is a deliberate busy-poll.
const TAILABLE_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Flush dead cursors whenever the backlog reaches a multiple of this.
const KILL_BATCH: usize = 20;

/// Flush unconditionally once the backlog reaches this many handles.
const KILL_CEILING: usize = 100;

/// One parsed reply batch plus the query options that produced it.
struct Batch {
    flags: ReplyFlags,
    cursor_id: i64,
    returned: i32,
    docs: VecDeque<Document>,
    body_len: usize,
    options: QueryOptions,
}

impl Batch {
    fn new(reply: Reply, options: QueryOptions) -> Self {
        Self {
            flags: reply.flags,
            cursor_id: reply.cursor_id,
            returned: reply.number_returned,
            docs: reply.documents.into(),
            body_len: reply.body_len,
            options,
        }
    }

    /// Whether a get-more can produce further documents. For an empty
    /// tailable batch without await support this pauses briefly and then
    /// reports true, so callers poll instead of spinning.
    fn has_get_more(&self) -> bool {
        if self.cursor_id <= 0 {
            return false;
        }
        if self.returned > 0 {
            return true;
        }
        if !self.options.is_tailable() {
            return false;
        }
        if self.flags.await_capable() {
            return true;
        }
        tracing::debug!(cursor_id = self.cursor_id, "tailable cursor idle, pausing");
        std::thread::sleep(TAILABLE_RETRY_PAUSE);
        true
    }
}

/// A lazy sequence of documents streamed from one query.
pub struct Cursor {
    conn: Arc<dyn Connection>,
    pool: Arc<EncoderPool>,
    reaper: Arc<DeadCursorReaper>,
    namespace: String,
    batch_size: i32,
    options: QueryOptions,
    batch: Batch,
    total_bytes: u64,
    get_more_count: u32,
    batch_sizes: Vec<usize>,
}

impl Cursor {
    /// Builds a cursor from the initial query reply. A reply holding
    /// exactly one document with an error field is a query failure.
    pub(crate) fn new(
        conn: Arc<dyn Connection>,
        pool: Arc<EncoderPool>,
        reaper: Arc<DeadCursorReaper>,
        namespace: String,
        batch_size: i32,
        options: QueryOptions,
        reply: Reply,
    ) -> Result<Self, ClientError> {
        if reply.documents.len() == 1 {
            if let Some(message) = reply.documents[0].get_str(ERROR_KEY) {
                return Err(ClientError::QueryFailure {
                    message: message.to_string(),
                });
            }
        }

        let batch = Batch::new(reply, options);
        let first_len = batch.docs.len();
        Ok(Self {
            conn,
            pool,
            reaper,
            namespace,
            batch_size,
            options,
            total_bytes: batch.body_len as u64,
            batch_sizes: vec![first_len],
            batch,
            get_more_count: 0,
        })
    }

    /// Whether another document is available, fetching batches as needed.
    pub fn has_next(&mut self) -> Result<bool, ClientError> {
        loop {
            if !self.batch.docs.is_empty() {
                return Ok(true);
            }
            if !self.batch.has_get_more() {
                return Ok(false);
            }
            self.advance()?;
        }
    }

    /// Fetches the next document, or `None` once the sequence ends.
    pub fn next_document(&mut self) -> Result<Option<Document>, ClientError> {
        if self.has_next()? {
            Ok(self.batch.docs.pop_front())
        } else {
            Ok(None)
        }
    }

    fn advance(&mut self) -> Result<(), ClientError> {
        if self.batch.cursor_id <= 0 {
            return Err(ClientError::CursorExhausted);
        }

        let conn = Arc::clone(&self.conn);
        let namespace = self.namespace.clone();
        let batch_size = self.batch_size;
        let cursor_id = self.batch.cursor_id;
        let reply = self.pool.with(|enc| -> Result<Reply, ClientError> {
            message::build_get_more(enc, &namespace, batch_size, cursor_id)?;
            let body = conn.send_receive(enc.finish())?;
            Ok(parse_reply(&body)?)
        })?;

        self.get_more_count += 1;
        self.total_bytes += reply.body_len as u64;
        self.batch_sizes.push(reply.documents.len());
        self.batch = Batch::new(reply, self.options);
        Ok(())
    }

    /// Remote cursor handle, non-positive once the stream is complete.
    pub fn cursor_id(&self) -> i64 {
        self.batch.cursor_id
    }

    /// Cumulative reply bytes transferred.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Number of get-more round trips issued so far.
    pub fn get_more_count(&self) -> u32 {
        self.get_more_count
    }

    /// Document count of every batch received so far.
    pub fn batch_sizes(&self) -> &[usize] {
        &self.batch_sizes
    }
}

impl Iterator for Cursor {
    type Item = Result<Document, ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_document().transpose()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.batch.cursor_id > 0 {
            self.reaper.retire(self.batch.cursor_id);
        }
    }
}

/// Accumulates dead cursor handles and kills them in batches.
pub struct DeadCursorReaper {
    conn: Arc<dyn Connection>,
    pool: Arc<EncoderPool>,
    pending: Mutex<Vec<i64>>,
}

impl DeadCursorReaper {
    pub fn new(conn: Arc<dyn Connection>, pool: Arc<EncoderPool>) -> Self {
        Self {
            conn,
            pool,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Queues a dead handle and flushes if the backlog warrants it.
    pub fn retire(&self, cursor_id: i64) {
        self.pending.lock().push(cursor_id);
        self.maybe_flush();
    }

    /// Sends one kill-cursors message covering the whole backlog, but only
    /// once it reaches a multiple of the batch size or the hard ceiling.
    /// The backlog is swapped out before the network call and restored on
    /// failure.
    pub fn maybe_flush(&self) {
        let drained = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return;
            }
            if pending.len() % KILL_BATCH != 0 && pending.len() < KILL_CEILING {
                return;
            }
            std::mem::take(&mut *pending)
        };

        tracing::info!(count = drained.len(), "killing dead cursors");
        if let Err(error) = self.kill(&drained) {
            tracing::warn!(%error, "could not kill cursors; requeueing");
            self.pending.lock().extend(drained);
        }
    }

    fn kill(&self, cursor_ids: &[i64]) -> Result<(), ClientError> {
        self.pool.with(|enc| -> Result<(), ClientError> {
            message::build_kill_cursors(enc, cursor_ids)?;
            // fire-and-forget: cursor cleanup never waits on acknowledgment
            self.conn.send(enc.finish())?;
            Ok(())
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
