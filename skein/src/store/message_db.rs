//! Message DB (Postgres) event store.
//!
//! Message DB exposes the log through SQL functions: `write_message` appends
//! with an `expected_version` check, `get_stream_messages` /
//! `get_category_messages` read in position order. `write_message` takes a
//! per-stream advisory lock that is released on commit, so every append runs
//! in its own transaction and commits before the connection goes back to the
//! pool.
//!
//! A version mismatch surfaces from the database as a raised error whose
//! message starts with "Wrong expected version"; it is mapped to
//! [`StoreError::ConcurrencyConflict`]. Everything else stays opaque.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Pool, Runtime};
use serde_json::Value;
use tokio_postgres::error::Error as PgError;
use tokio_postgres::NoTls;
use tracing::debug;
use uuid::Uuid;

use crate::event::{Envelope, EventBody, Metadata};
use crate::stream::StreamName;

use super::{EventStore, StoreError};

const WRITE_MESSAGE: &str = "SELECT message_store.write_message($1, $2, $3, $4, $5, $6)";

const GET_STREAM_MESSAGES: &str = "SELECT id, stream_name, type, position, global_position, \
     data, metadata, time \
     FROM message_store.get_stream_messages($1, $2, $3)";

const GET_CATEGORY_MESSAGES: &str = "SELECT id, stream_name, type, position, global_position, \
     data, metadata, time \
     FROM message_store.get_category_messages($1, $2, $3)";

const STORE_VERSION: &str = "SELECT message_store.message_store_version()";

/// Connection settings for the message store database.
#[derive(Debug, Clone)]
pub struct MessageDbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl Default for MessageDbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            dbname: "message_store".into(),
            user: "message_store".into(),
            password: String::new(),
        }
    }
}

/// [`EventStore`] backed by Message DB. Holds a connection pool; each
/// operation checks out one connection for one transaction.
pub struct MessageDbStore {
    pool: Pool,
}

impl MessageDbStore {
    /// Builds a lazily-connecting pool from the given settings.
    pub fn connect(config: &MessageDbConfig) -> Result<Self, StoreError> {
        let mut pool_cfg = deadpool_postgres::Config::new();
        pool_cfg.host = Some(config.host.clone());
        pool_cfg.port = Some(config.port);
        pool_cfg.dbname = Some(config.dbname.clone());
        pool_cfg.user = Some(config.user.clone());
        pool_cfg.password = Some(config.password.clone());
        let pool = pool_cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool (e.g. one shared with other components).
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Reads events across all streams of a category (`category:version`),
    /// ascending by global position. Serves the session listing; the core
    /// [`EventStore`] trait stays per-stream.
    pub async fn read_category(
        &self,
        category: &str,
        from_global_position: u64,
        batch_size: usize,
    ) -> Result<Vec<Envelope>, StoreError> {
        let client = self.checkout().await?;
        let rows = client
            .query(
                GET_CATEGORY_MESSAGES,
                &[
                    &category,
                    &(from_global_position as i64),
                    &(batch_size as i64),
                ],
            )
            .await
            .map_err(classify)?;
        rows.iter().map(decode_row).collect()
    }

    async fn checkout(&self) -> Result<deadpool_postgres::Object, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

#[async_trait]
impl EventStore for MessageDbStore {
    async fn append(
        &self,
        stream: &StreamName,
        body: &EventBody,
        metadata: &Metadata,
        expected_version: i64,
    ) -> Result<u64, StoreError> {
        let id = Uuid::new_v4().to_string();
        let stream_name = stream.to_string();
        let kind = body.kind().to_string();
        let data = body.to_data();
        let metadata = serde_json::to_value(metadata)
            .map_err(|e| StoreError::Backend(format!("metadata serialization: {}", e)))?;

        let mut client = self.checkout().await?;
        // write_message holds a stream advisory lock until commit.
        let tx = client.transaction().await.map_err(classify)?;
        let row = tx
            .query_one(
                WRITE_MESSAGE,
                &[&id, &stream_name, &kind, &data, &metadata, &expected_version],
            )
            .await
            .map_err(|e| classify_append(e, &stream_name, expected_version))?;
        tx.commit().await.map_err(classify)?;

        let position: i64 = row.get(0);
        debug!(stream = %stream_name, kind = %kind, position, "event appended");
        Ok(position as u64)
    }

    async fn read(
        &self,
        stream: &StreamName,
        from_position: u64,
        batch_size: usize,
    ) -> Result<Vec<Envelope>, StoreError> {
        let client = self.checkout().await?;
        let rows = client
            .query(
                GET_STREAM_MESSAGES,
                &[
                    &stream.to_string(),
                    &(from_position as i64),
                    &(batch_size as i64),
                ],
            )
            .await
            .map_err(classify)?;
        rows.iter().map(decode_row).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let client = self.checkout().await?;
        client.query_one(STORE_VERSION, &[]).await.map_err(classify)?;
        Ok(())
    }
}

/// Maps a database error on append: the Message DB version-check failure
/// becomes `ConcurrencyConflict`, the rest goes through [`classify`].
fn classify_append(error: PgError, stream: &str, expected: i64) -> StoreError {
    if let Some(db) = error.as_db_error() {
        if db.message().contains("Wrong expected version") {
            return StoreError::ConcurrencyConflict {
                stream: stream.to_string(),
                expected,
            };
        }
    }
    classify(error)
}

/// Server-reported errors are opaque backend failures; everything else
/// (socket, timeout, pool) is a connection failure and may succeed on retry.
fn classify(error: PgError) -> StoreError {
    if error.as_db_error().is_some() {
        StoreError::Backend(error.to_string())
    } else {
        StoreError::Connection(error.to_string())
    }
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Envelope, StoreError> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| StoreError::Backend(format!("message id is not a uuid: {}", e)))?;
    let stream_name: String = row.get("stream_name");
    let kind: String = row.get("type");
    let position: i64 = row.get("position");
    let global_position: i64 = row.get("global_position");

    // get_stream_messages returns data/metadata as text; NULL metadata means
    // "no metadata".
    let data: Option<String> = row.get("data");
    let data: Value = match data {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| StoreError::Backend(format!("event data is not JSON: {}", e)))?,
        None => Value::Null,
    };
    let metadata: Option<String> = row.get("metadata");
    let metadata: Metadata = match metadata.as_deref() {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw)
            .map_err(|e| StoreError::Backend(format!("event metadata is not JSON: {}", e)))?,
        _ => Metadata::default(),
    };

    // Message DB stores `time` as a naive UTC timestamp.
    let time: chrono::NaiveDateTime = row.get("time");
    let time = DateTime::<Utc>::from_naive_utc_and_offset(time, Utc);

    Ok(Envelope {
        id,
        stream_name,
        kind,
        data,
        metadata,
        position: position as u64,
        global_position: global_position as u64,
        time,
    })
}
