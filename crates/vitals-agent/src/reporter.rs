use crate::transport::{Transport, TransportError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use vitals_common::model::MetricPayload;
use vitals_storage::memory::MemoryStorage;

/// Metrics per request.
pub const BATCH_SIZE: usize = 10;

/// Ships the store's contents on a fixed cadence.
///
/// Each cycle drains the store in one critical section, partitions the
/// snapshot into batches and fans the batches out to a fixed-width worker
/// pool. The first transport error cancels the remaining workers.
pub struct Reporter {
    storage: Arc<MemoryStorage>,
    transport: Arc<dyn Transport>,
    rate_limit: usize,
}

impl Reporter {
    pub fn new(
        storage: Arc<MemoryStorage>,
        transport: Arc<dyn Transport>,
        rate_limit: usize,
    ) -> Self {
        Self {
            storage,
            transport,
            rate_limit: rate_limit.max(1),
        }
    }

    pub async fn run(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        tracing::info!("reporter started");

        let start = tokio::time::Instant::now() + interval;
        let mut tick = tokio::time::interval_at(start, interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("reporter stopped");
                    return Ok(());
                }
                _ = tick.tick() => self.report_once().await?,
            }
        }
    }

    pub async fn report_once(&self) -> Result<(), TransportError> {
        let snapshot = self.storage.drain();
        if snapshot.is_empty() {
            tracing::debug!("no metrics to report");
            return Ok(());
        }

        let payloads: Vec<MetricPayload> = snapshot.values().map(MetricPayload::from).collect();
        let batches: Arc<Vec<Vec<MetricPayload>>> =
            Arc::new(payloads.chunks(BATCH_SIZE).map(<[_]>::to_vec).collect());

        tracing::info!(
            metrics = payloads.len(),
            batches = batches.len(),
            workers = self.rate_limit,
            "reporting metrics"
        );

        // All batches form one closed queue; workers claim the next index
        // until it runs dry.
        let next = Arc::new(AtomicUsize::new(0));
        let mut workers: JoinSet<Result<(), TransportError>> = JoinSet::new();
        for worker_id in 0..self.rate_limit {
            let batches = Arc::clone(&batches);
            let next = Arc::clone(&next);
            let transport = Arc::clone(&self.transport);
            workers.spawn(async move {
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(batch) = batches.get(index) else {
                        return Ok(());
                    };
                    tracing::info!(worker_id, batch_size = batch.len(), "reporting batch");
                    transport.send_batch(batch).await?;
                }
            });
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                        workers.abort_all();
                    }
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::error!(error = %e, "report worker panicked"),
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vitals_common::model::Metric;
    use vitals_storage::Storage;

    #[derive(Default)]
    struct RecordingTransport {
        batches: Mutex<Vec<Vec<MetricPayload>>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_batch(&self, batch: &[MetricPayload]) -> Result<(), TransportError> {
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        async fn send_batch(&self, _batch: &[MetricPayload]) -> Result<(), TransportError> {
            Err(TransportError::BadStatus(500))
        }
    }

    async fn populate(storage: &MemoryStorage, count: usize) {
        for i in 0..count {
            storage
                .set_or_update_metric(Metric::Counter { id: format!("m{i}"), value: i as i64 })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn partitions_into_batches_and_drains_the_store_once() {
        let storage = Arc::new(MemoryStorage::new());
        populate(&storage, 23).await;

        let transport = Arc::new(RecordingTransport::default());
        let reporter = Reporter::new(storage.clone(), transport.clone(), 3);
        reporter.report_once().await.unwrap();

        let batches = transport.batches.lock().unwrap();
        let mut sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, [3, 10, 10]);

        // none dropped, none duplicated
        let mut ids: Vec<String> =
            batches.iter().flatten().map(|p| p.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 23);

        assert!(storage.get_metrics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_store_sends_nothing() {
        let transport = Arc::new(RecordingTransport::default());
        let reporter = Reporter::new(Arc::new(MemoryStorage::new()), transport.clone(), 3);

        reporter.report_once().await.unwrap();
        assert!(transport.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_transport_error_surfaces() {
        let storage = Arc::new(MemoryStorage::new());
        populate(&storage, 15).await;

        let reporter = Reporter::new(storage, Arc::new(FailingTransport), 2);
        let err = reporter.report_once().await.unwrap_err();
        assert!(matches!(err, TransportError::BadStatus(500)));
    }
}
