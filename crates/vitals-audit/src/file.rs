use crate::{AuditError, AuditEvent, Observer};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends one JSON-encoded event per line. Writes are serialized by a lock
/// so concurrent events never interleave.
pub struct FileObserver {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileObserver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Observer for FileObserver {
    fn name(&self) -> &str {
        "file"
    }

    async fn notify(&self, event: AuditEvent) -> Result<(), AuditError> {
        let _guard = self.write_lock.lock().await;

        tracing::debug!(
            metrics_num = event.metrics.len(),
            client_ip = %event.ip_address,
            "writing file audit event"
        );

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_all().await?;

        Ok(())
    }
}
