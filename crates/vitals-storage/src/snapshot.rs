use crate::{Storage, StorageError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use vitals_common::model::{Metric, MetricPayload};

/// Periodically dumps the store to a JSON file and restores it on startup.
///
/// Only wired up for the in-memory store; the SQL store owns its durability.
pub struct Snapshotter {
    storage: Arc<dyn Storage>,
    path: PathBuf,
    interval: Duration,
}

impl Snapshotter {
    pub fn new(storage: Arc<dyn Storage>, path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            storage,
            path: path.into(),
            interval,
        }
    }

    /// Saves on every interval tick until shutdown. Ticks that land after the
    /// shutdown signal are skipped rather than racing the exit.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StorageError> {
        tracing::info!(path = %self.path.display(), "snapshotter started");

        let start = tokio::time::Instant::now() + self.interval;
        let mut tick = tokio::time::interval_at(start, self.interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if *shutdown.borrow() {
                        continue;
                    }
                    self.save().await?;
                }
                _ = shutdown.changed() => {
                    tracing::info!("snapshotter stopped");
                    return Ok(());
                }
            }
        }
    }

    /// Reads the snapshot back. A missing file is an empty start, not an
    /// error; malformed content is.
    pub async fn restore(&self) -> Result<Vec<Metric>, StorageError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no snapshot file found, skipping restore");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let payloads: Vec<MetricPayload> = serde_json::from_slice(&data)?;
        let mut metrics = Vec::with_capacity(payloads.len());
        for payload in payloads {
            metrics.push(Metric::try_from(payload)?);
        }

        Ok(metrics)
    }

    pub async fn save(&self) -> Result<(), StorageError> {
        let metrics = self.storage.get_metrics().await?;
        if metrics.is_empty() {
            tracing::debug!("no metrics to snapshot");
            return Ok(());
        }

        let payloads: Vec<MetricPayload> = metrics.values().map(MetricPayload::from).collect();
        let data = serde_json::to_vec(&payloads)?;

        let mut file = tokio::fs::File::create(&self.path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;

        tracing::info!(count = payloads.len(), "metrics snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;

    fn snapshotter_at(dir: &tempfile::TempDir, storage: Arc<MemoryStorage>) -> Snapshotter {
        Snapshotter::new(
            storage,
            dir.path().join("metrics.json"),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn save_then_restore_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set_or_update_metric(Metric::Counter { id: "hits".into(), value: 7 })
            .await
            .unwrap();
        storage
            .set_or_update_metric(Metric::Gauge { id: "temp".into(), value: 36.6 })
            .await
            .unwrap();

        let snapshotter = snapshotter_at(&dir, storage);
        snapshotter.save().await.unwrap();

        let restored = snapshotter.restore().await.unwrap();
        let fresh = MemoryStorage::new();
        fresh.initialize(restored).await.unwrap();

        assert_eq!(
            fresh.get_metric("hits").await.unwrap(),
            Metric::Counter { id: "hits".into(), value: 7 }
        );
        assert_eq!(
            fresh.get_metric("temp").await.unwrap(),
            Metric::Gauge { id: "temp".into(), value: 36.6 }
        );
    }

    #[tokio::test]
    async fn missing_file_restores_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = snapshotter_at(&dir, Arc::new(MemoryStorage::new()));

        assert!(snapshotter.restore().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_snapshot_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let snapshotter = Snapshotter::new(
            Arc::new(MemoryStorage::new()),
            path,
            Duration::from_secs(300),
        );
        assert!(matches!(
            snapshotter.restore().await,
            Err(StorageError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn empty_store_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = snapshotter_at(&dir, Arc::new(MemoryStorage::new()));
        snapshotter.save().await.unwrap();

        assert!(!dir.path().join("metrics.json").exists());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(
            Arc::new(MemoryStorage::new()),
            dir.path().join("metrics.json"),
            Duration::from_millis(5),
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { snapshotter.run(rx).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        handle.await.unwrap().unwrap();
    }
}
