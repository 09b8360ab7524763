use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use vitals_common::model::Metric;
use vitals_storage::memory::MemoryStorage;
use vitals_storage::{Storage, StorageError};

/// Sole consumer of the sample channel: folds every sample into the store
/// with the type-specific merge (counter add, gauge replace).
pub struct Aggregator {
    storage: Arc<MemoryStorage>,
}

impl Aggregator {
    pub fn new(storage: Arc<MemoryStorage>) -> Self {
        Self { storage }
    }

    /// Runs until shutdown or until every sender is gone. Samples still in
    /// flight at cancellation are dropped. Store errors terminate the
    /// pipeline.
    pub async fn run(
        &self,
        mut samples: mpsc::Receiver<Metric>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), StorageError> {
        tracing::info!("aggregator started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("aggregator stopped");
                    return Ok(());
                }
                sample = samples.recv() => match sample {
                    Some(metric) => self.storage.set_or_update_metric(metric).await?,
                    None => return Ok(()),
                }
            }
        }
    }
}
