//! Event store: append-only per-stream logs with optimistic concurrency.
//!
//! The store is the single source of truth. Appends carry the position the
//! writer believes is the current stream head (`expected_version`, or
//! [`NO_STREAM`] when the stream must not exist yet); a mismatch is rejected
//! as [`StoreError::ConcurrencyConflict`], which callers must be able to tell
//! apart from infrastructure failures. Reads return events in strict
//! per-stream position order.
//!
//! Implementations: [`InMemoryEventStore`] (tests, demos) and
//! [`MessageDbStore`] (Message DB on Postgres).

mod memory;
mod message_db;

pub use memory::InMemoryEventStore;
pub use message_db::{MessageDbConfig, MessageDbStore};

use async_trait::async_trait;
use thiserror::Error;

use crate::event::{Envelope, EventBody, Metadata};
use crate::stream::StreamName;

/// `expected_version` value asserting the stream does not exist yet.
pub const NO_STREAM: i64 = -1;

/// Default read batch size.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Store failures. Only `ConcurrencyConflict` is part of normal control flow;
/// everything else is opaque infrastructure failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stream head moved past the caller's `expected_version`; another
    /// writer got there first.
    #[error("concurrency conflict on {stream}: expected version {expected}")]
    ConcurrencyConflict { stream: String, expected: i64 },

    /// Could not obtain or use a connection; may succeed on retry.
    #[error("store connection: {0}")]
    Connection(String),

    /// Any other backend failure (bad SQL state, serialization, constraint).
    #[error("store backend: {0}")]
    Backend(String),
}

impl StoreError {
    /// True when the failure is the expected optimistic-concurrency rejection.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

/// Append-only event log keyed by stream name.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends one event. `expected_version` is the position of the last
    /// event the caller observed ([`NO_STREAM`] for a new stream). Returns
    /// the position of the written event.
    async fn append(
        &self,
        stream: &StreamName,
        body: &EventBody,
        metadata: &Metadata,
        expected_version: i64,
    ) -> Result<u64, StoreError>;

    /// Reads up to `batch_size` events at or after `from_position`, ascending
    /// by per-stream position. An empty result means the stream has no events
    /// at or past `from_position`.
    async fn read(
        &self,
        stream: &StreamName,
        from_position: u64,
        batch_size: usize,
    ) -> Result<Vec<Envelope>, StoreError>;

    /// Liveness probe of the backing store.
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Reads the whole stream by iterating batches of [`DEFAULT_BATCH_SIZE`].
    async fn read_stream(&self, stream: &StreamName) -> Result<Vec<Envelope>, StoreError> {
        let mut events = Vec::new();
        let mut from = 0u64;
        loop {
            let batch = self.read(stream, from, DEFAULT_BATCH_SIZE).await?;
            let fetched = batch.len();
            events.extend(batch);
            if fetched < DEFAULT_BATCH_SIZE {
                return Ok(events);
            }
            from += fetched as u64;
        }
    }
}
