use crate::{Storage, StorageError};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use vitals_common::model::{Metric, MetricKind};
use vitals_common::retry::Retrier;

const MIGRATION: &str = "
CREATE TABLE IF NOT EXISTS metrics (
    id    TEXT PRIMARY KEY,
    type  TEXT NOT NULL,
    value TEXT NOT NULL
)";

// Counter merge is additive and done in SQL so concurrent upserts stay exact.
const UPSERT_COUNTER: &str = "
INSERT INTO metrics (id, type, value)
VALUES ($1, $2, $3)
ON CONFLICT (id) DO
UPDATE SET value = (CAST(metrics.value AS BIGINT) +
                    CAST(EXCLUDED.value AS BIGINT))::TEXT";

const UPSERT_GAUGE: &str = "
INSERT INTO metrics (id, type, value)
VALUES ($1, $2, $3)
ON CONFLICT (id) DO
UPDATE SET value = EXCLUDED.value";

/// PostgreSQL-backed store with a single `metrics` table.
///
/// The snapshotter is never run against this store; the database owns
/// durability.
pub struct PostgresStorage {
    pool: PgPool,
}

/// Connection-class failures worth retrying: broken sockets, exhausted pools
/// and the SQLSTATE 08/57 classes (connection exception, operator
/// intervention).
pub fn is_connection_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        _ => err
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code.starts_with("08") || code.starts_with("57")),
    }
}

impl PostgresStorage {
    pub async fn new(dsn: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new().connect(dsn).await?;
        sqlx::query(MIGRATION).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn row_to_metric(row: &sqlx::postgres::PgRow) -> Result<Metric, StorageError> {
        let id: String = row.get("id");
        let kind: String = row.get("type");
        let value: String = row.get("value");

        let kind = MetricKind::from_str(&kind)?;
        Ok(Metric::from_parts(kind, &id, &value)?)
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn get_metric(&self, id: &str) -> Result<Metric, StorageError> {
        let row = sqlx::query("SELECT id, type, value FROM metrics WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        Self::row_to_metric(&row)
    }

    async fn get_metrics(&self) -> Result<HashMap<String, Metric>, StorageError> {
        let rows = sqlx::query("SELECT id, type, value FROM metrics")
            .fetch_all(&self.pool)
            .await?;

        let mut metrics = HashMap::with_capacity(rows.len());
        for row in &rows {
            let metric = Self::row_to_metric(row)?;
            metrics.insert(metric.id().to_string(), metric);
        }
        Ok(metrics)
    }

    async fn set_or_update_metric(&self, metric: Metric) -> Result<(), StorageError> {
        let query = match metric.kind() {
            MetricKind::Counter => UPSERT_COUNTER,
            MetricKind::Gauge => UPSERT_GAUGE,
        };

        sqlx::query(query)
            .bind(metric.id())
            .bind(metric.kind().to_string())
            .bind(metric.value_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_or_update_metric_batch(&self, metrics: Vec<Metric>) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        for metric in &metrics {
            let query = match metric.kind() {
                MetricKind::Counter => UPSERT_COUNTER,
                MetricKind::Gauge => UPSERT_GAUGE,
            };

            sqlx::query(query)
                .bind(metric.id())
                .bind(metric.kind().to_string())
                .bind(metric.value_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn initialize(&self, _metrics: Vec<Metric>) -> Result<(), StorageError> {
        // Restore is a file-store concern; the database already holds state.
        Ok(())
    }

    async fn reset(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM metrics")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let retrier = Retrier::new(is_connection_error);
        retrier
            .run(|| async {
                sqlx::query("SELECT 1").execute(&self.pool).await?;
                Ok::<_, sqlx::Error>(())
            })
            .await
            .map_err(|e| StorageError::Sql(e.into_inner()))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
