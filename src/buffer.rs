//! Write buffers that batch documents per collection.
//!
//! A buffer flushes when it holds more than its threshold, or when more time
//! than its wait window has passed since the last flush. The wait window is
//! derived from the threshold (in milliseconds) plus a margin, and is derived
//! again whenever the threshold changes.
//!
//! Duplicate keys reported by a flush are the benign result of idempotent
//! re-saves. They are logged and swallowed, while the rest of the batch
//! stands. Any other failure puts the batch back and is returned. The backlog
//! kept this way is capped at [`BACKLOG_FACTOR`] times the threshold: once it
//! is reached, a write first retries the flush and is refused if that fails.
//!
//! A buffer must be closed by its owner, which performs the final flush.
//! Writes after closing fail with [`EavError::Closed`].

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::document::{Document, Filter, UpsertModel};
use crate::error::{EavError, Result};
use crate::store::DocumentStore;

pub const DEFAULT_BUFFER_WRITE_THRESHOLD: usize = 1000;
pub const BACKLOG_FACTOR: usize = 4;

pub trait BulkOperation {
    /// Writes whatever is buffered. Flushing an empty buffer does nothing.
    fn flush(&self) -> Result<()>;
    /// Final flush. The buffer accepts no writes afterwards.
    fn close(&self) -> Result<()>;
    fn set_buffer_write_threshold(&self, threshold: usize);
    fn pending(&self) -> usize;
}

/// What a buffer holds and how a batch of it reaches the store.
pub trait Pending: Clone + Send {
    /// Fraction of the threshold added to derive the wait window.
    const WAIT_MARGIN: f64;
    fn send(store: &dyn DocumentStore, collection: &str, batch: Vec<Self>) -> Result<usize>;
}

impl Pending for Document {
    const WAIT_MARGIN: f64 = 0.10;
    fn send(store: &dyn DocumentStore, collection: &str, batch: Vec<Self>) -> Result<usize> {
        store.insert_many(collection, batch)
    }
}

impl Pending for UpsertModel {
    const WAIT_MARGIN: f64 = 1.0;
    fn send(store: &dyn DocumentStore, collection: &str, batch: Vec<Self>) -> Result<usize> {
        store.bulk_upsert(collection, batch)
    }
}

#[derive(Debug)]
struct FlushPolicy {
    threshold: usize,
    wait: Duration,
    last_flush: Instant,
}

impl FlushPolicy {
    fn new(threshold: usize, margin: f64) -> Self {
        let mut policy = Self {
            threshold,
            wait: Duration::ZERO,
            last_flush: Instant::now(),
        };
        policy.set_threshold(threshold, margin);
        policy
    }
    fn set_threshold(&mut self, threshold: usize, margin: f64) {
        self.threshold = threshold;
        self.wait = Duration::from_millis(threshold as u64 + (threshold as f64 * margin) as u64);
    }
    fn backlog(&self) -> usize {
        self.threshold.max(1).saturating_mul(BACKLOG_FACTOR)
    }
    fn is_due(&self, pending: usize) -> bool {
        pending > self.threshold || self.last_flush.elapsed() > self.wait
    }
}

#[derive(Debug)]
struct Buffered<T> {
    pending: Vec<T>,
    policy: FlushPolicy,
    closed: bool,
}

/// Buffers writes to one collection. See the module documentation.
pub struct BulkWriteBuffer<T: Pending> {
    collection: String,
    store: Arc<dyn DocumentStore>,
    state: Mutex<Buffered<T>>,
}

/// Accumulates whole documents, flushed as an unordered bulk insert.
pub type InsertBuffer = BulkWriteBuffer<Document>;
/// Accumulates filter and update pairs, flushed as a bulk upsert.
pub type UpsertBuffer = BulkWriteBuffer<UpsertModel>;

impl<T: Pending> BulkWriteBuffer<T> {
    pub fn new(store: Arc<dyn DocumentStore>, collection: &str, threshold: usize) -> Self {
        let policy = FlushPolicy::new(threshold, T::WAIT_MARGIN);
        info!(
            collection,
            threshold,
            wait_ms = policy.wait.as_millis() as u64,
            "bulk write buffer"
        );
        Self {
            collection: collection.to_owned(),
            store,
            state: Mutex::new(Buffered {
                pending: Vec::new(),
                policy,
                closed: false,
            }),
        }
    }

    /// Buffers one item. Returns true if and only if this call flushed.
    pub fn push(&self, item: T) -> Result<bool> {
        let mut state = self.state.lock()?;
        if state.closed {
            return Err(EavError::Closed(self.collection.clone()));
        }
        if state.pending.len() >= state.policy.backlog() {
            self.flush_buffered(&mut state)?;
        }
        state.pending.push(item);
        if state.policy.is_due(state.pending.len()) {
            self.flush_buffered(&mut state)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn flush_buffered(&self, state: &mut Buffered<T>) -> Result<()> {
        if state.pending.is_empty() {
            state.policy.last_flush = Instant::now();
            return Ok(());
        }
        let batch = std::mem::take(&mut state.pending);
        let size = batch.len();
        match T::send(self.store.as_ref(), &self.collection, batch.clone()) {
            Ok(written) => {
                debug!(collection = %self.collection, size, written, "flushed");
            }
            Err(e) if e.is_duplicate_key() => {
                debug!(collection = %self.collection, size, error = %e, "flushed with duplicates");
            }
            Err(e) => {
                // keep arrival order: the failed batch precedes anything buffered since
                let newer = std::mem::replace(&mut state.pending, batch);
                state.pending.extend(newer);
                warn!(
                    collection = %self.collection,
                    backlog = state.pending.len(),
                    cap = state.policy.backlog(),
                    error = %e,
                    "flush failed, batch kept"
                );
                return Err(e);
            }
        }
        state.policy.last_flush = Instant::now();
        Ok(())
    }
}

impl InsertBuffer {
    pub fn write(&self, document: Document) -> Result<bool> {
        self.push(document)
    }
}

impl UpsertBuffer {
    pub fn update(&self, filter: Filter, set: Document) -> Result<bool> {
        self.push(UpsertModel::new(filter, set))
    }
}

impl<T: Pending> BulkOperation for BulkWriteBuffer<T> {
    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        self.flush_buffered(&mut state)
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        self.flush_buffered(&mut state)
    }

    fn set_buffer_write_threshold(&self, threshold: usize) {
        match self.state.lock() {
            Ok(mut state) => {
                state.policy.set_threshold(threshold, T::WAIT_MARGIN);
                info!(
                    collection = %self.collection,
                    threshold,
                    wait_ms = state.policy.wait.as_millis() as u64,
                    "bulk write threshold changed"
                );
            }
            Err(e) => warn!(collection = %self.collection, error = %e, "threshold unchanged"),
        }
    }

    fn pending(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or_default()
    }
}

impl<T: Pending> Drop for BulkWriteBuffer<T> {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if !state.closed && !state.pending.is_empty() {
                warn!(
                    collection = %self.collection,
                    pending = state.pending.len(),
                    "write buffer dropped without close, pending documents are lost"
                );
            }
        }
    }
}
