//! Metric persistence layer.
//!
//! Two interchangeable stores implement [`Storage`]: an in-memory map guarded
//! by a single lock ([`memory::MemoryStorage`]) and a PostgreSQL-backed store
//! with SQL upsert merge semantics ([`postgres::PostgresStorage`]). The file
//! snapshotter ([`snapshot::Snapshotter`]) gives the in-memory variant
//! durability across restarts.

pub mod memory;
pub mod postgres;
pub mod snapshot;

use async_trait::async_trait;
use std::collections::HashMap;
use vitals_common::model::{Metric, MetricKind, ModelError};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("metric {0} not found")]
    NotFound(String),

    #[error("metric {id} already exists with type {existing}")]
    TypeConflict { id: String, existing: MetricKind },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The store owns all metric entries; callers pass owned values in and
/// receive owned copies out.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_metric(&self, id: &str) -> Result<Metric, StorageError>;

    /// Returns an owned snapshot of the full map.
    async fn get_metrics(&self) -> Result<HashMap<String, Metric>, StorageError>;

    /// Creates the entry or merges into the existing one: counters add,
    /// gauges replace. A kind mismatch on an existing id fails without
    /// mutating the entry.
    async fn set_or_update_metric(&self, metric: Metric) -> Result<(), StorageError>;

    /// Atomic batch merge: either every entry is applied or none is.
    async fn set_or_update_metric_batch(&self, metrics: Vec<Metric>) -> Result<(), StorageError>;

    /// Replaces the contents from a restored snapshot. Startup only.
    async fn initialize(&self, metrics: Vec<Metric>) -> Result<(), StorageError>;

    /// Empties the store atomically with respect to readers.
    async fn reset(&self) -> Result<(), StorageError>;

    /// Health probe; must not mutate.
    async fn ping(&self) -> Result<(), StorageError>;

    async fn close(&self);
}
