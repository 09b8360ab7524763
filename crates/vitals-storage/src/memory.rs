use crate::{Storage, StorageError};
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;
use vitals_common::model::Metric;

/// In-memory store: a map from id to metric behind a single lock.
///
/// All mutation happens under the write lock, so readers never observe a
/// partially applied batch.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    metrics: RwLock<HashMap<String, Metric>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps the map out and leaves the store empty, in one critical section.
    ///
    /// The reporter uses this so that no sample can be both counted in the
    /// returned snapshot and seen by the next cycle.
    pub fn drain(&self) -> HashMap<String, Metric> {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        std::mem::take(&mut *metrics)
    }

    fn merge_into(
        metrics: &mut HashMap<String, Metric>,
        incoming: Metric,
    ) -> Result<(), StorageError> {
        match metrics.entry(incoming.id().to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(incoming);
                Ok(())
            }
            Entry::Occupied(mut slot) => match (slot.get_mut(), incoming) {
                (Metric::Counter { value, .. }, Metric::Counter { value: delta, .. }) => {
                    *value += delta;
                    Ok(())
                }
                (Metric::Gauge { value, .. }, Metric::Gauge { value: next, .. }) => {
                    *value = next;
                    Ok(())
                }
                (existing, incoming) => Err(StorageError::TypeConflict {
                    id: incoming.id().to_string(),
                    existing: existing.kind(),
                }),
            },
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_metric(&self, id: &str) -> Result<Metric, StorageError> {
        let metrics = self.metrics.read().expect("metrics lock poisoned");
        metrics
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn get_metrics(&self) -> Result<HashMap<String, Metric>, StorageError> {
        let metrics = self.metrics.read().expect("metrics lock poisoned");
        Ok(metrics.clone())
    }

    async fn set_or_update_metric(&self, metric: Metric) -> Result<(), StorageError> {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        Self::merge_into(&mut metrics, metric)
    }

    async fn set_or_update_metric_batch(&self, incoming: Vec<Metric>) -> Result<(), StorageError> {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");

        // Stage the whole batch on a copy so a failure midway leaves the
        // store untouched.
        let mut staged = metrics.clone();
        for metric in incoming {
            Self::merge_into(&mut staged, metric)?;
        }

        *metrics = staged;
        Ok(())
    }

    async fn initialize(&self, incoming: Vec<Metric>) -> Result<(), StorageError> {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        *metrics = incoming
            .into_iter()
            .map(|m| (m.id().to_string(), m))
            .collect();
        Ok(())
    }

    async fn reset(&self) -> Result<(), StorageError> {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        metrics.clear();
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn close(&self) {}
}
