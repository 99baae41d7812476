//! In-memory event store: HashMap of streams behind a mutex.
//!
//! Same optimistic-concurrency semantics as the Message DB backend, for tests
//! and in-process demos. Volatile by design; never the source of truth for a
//! real deployment.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::event::{Envelope, EventBody, Metadata};
use crate::stream::StreamName;

use super::{EventStore, StoreError};

#[derive(Default)]
struct Backend {
    streams: HashMap<String, Vec<Envelope>>,
    next_global: u64,
}

/// Thread-safe in-memory [`EventStore`].
#[derive(Default)]
pub struct InMemoryEventStore {
    backend: Mutex<Backend>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all streams that have at least one event, in no particular
    /// order. Test/demo surface; the trait itself reads one stream at a time.
    pub fn stream_names(&self) -> Vec<String> {
        let backend = self.backend.lock().expect("event store mutex poisoned");
        backend.streams.keys().cloned().collect()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        stream: &StreamName,
        body: &EventBody,
        metadata: &Metadata,
        expected_version: i64,
    ) -> Result<u64, StoreError> {
        let mut backend = self.backend.lock().expect("event store mutex poisoned");
        let key = stream.to_string();
        let head = backend
            .streams
            .get(&key)
            .map(|events| events.len() as i64 - 1)
            .unwrap_or(super::NO_STREAM);
        if head != expected_version {
            return Err(StoreError::ConcurrencyConflict {
                stream: key,
                expected: expected_version,
            });
        }

        let position = (head + 1) as u64;
        let global_position = backend.next_global;
        backend.next_global += 1;
        let envelope = Envelope {
            id: Uuid::new_v4(),
            stream_name: key.clone(),
            kind: body.kind().to_string(),
            data: body.to_data(),
            metadata: metadata.clone(),
            position,
            global_position,
            time: Utc::now(),
        };
        backend.streams.entry(key).or_default().push(envelope);
        Ok(position)
    }

    async fn read(
        &self,
        stream: &StreamName,
        from_position: u64,
        batch_size: usize,
    ) -> Result<Vec<Envelope>, StoreError> {
        let backend = self.backend.lock().expect("event store mutex poisoned");
        let events = backend
            .streams
            .get(&stream.to_string())
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.position >= from_position)
                    .take(batch_size)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(events)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
