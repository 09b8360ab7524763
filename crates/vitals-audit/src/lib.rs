//! Audit fan-out: after a successful mutating request the server notifies
//! every registered observer with the touched metric ids and the client ip.
//!
//! Observers run concurrently under a shared time bound so a slow sink never
//! holds up the others; every observer is always tried and their failures are
//! collected into one composite error.

pub mod file;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("audit endpoint returned status {0}")]
    BadStatus(u16),

    #[error("observer timed out after {0:?}")]
    Timeout(Duration),

    #[error("{count} observer(s) failed: {summary}")]
    Composite { count: usize, summary: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub ts: i64,
    pub metrics: Vec<String>,
    pub ip_address: String,
}

#[async_trait]
pub trait Observer: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, event: AuditEvent) -> Result<(), AuditError>;
}

pub struct Auditor {
    observers: Vec<Arc<dyn Observer>>,
    timeout: Duration,
}

impl Default for Auditor {
    fn default() -> Self {
        Self::new()
    }
}

impl Auditor {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn add(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn has_observers(&self) -> bool {
        !self.observers.is_empty()
    }

    /// Builds the event and notifies every observer concurrently.
    pub async fn log_event(
        &self,
        metrics: Vec<String>,
        ip_address: String,
    ) -> Result<(), AuditError> {
        if self.observers.is_empty() {
            return Ok(());
        }

        let event = AuditEvent {
            ts: chrono::Utc::now().timestamp(),
            metrics,
            ip_address,
        };

        let mut tasks = JoinSet::new();
        for observer in &self.observers {
            let observer = observer.clone();
            let event = event.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, observer.notify(event)).await {
                    Ok(result) => result,
                    Err(_) => Err(AuditError::Timeout(timeout)),
                };
                (observer.name().to_string(), outcome)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => failures.push(format!("observer {name} failed: {e}")),
                Err(e) => failures.push(format!("observer task panicked: {e}")),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AuditError::Composite {
                count: failures.len(),
                summary: failures.join("; "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RecordingObserver {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl Observer for RecordingObserver {
        fn name(&self) -> &str {
            "recording"
        }

        async fn notify(&self, _event: AuditEvent) -> Result<(), AuditError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AuditError::BadStatus(503))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn no_observers_is_a_no_op() {
        let auditor = Auditor::new();
        auditor.log_event(vec!["hits".into()], "10.0.0.1".into()).await.unwrap();
    }

    #[tokio::test]
    async fn every_observer_is_tried_even_when_one_fails() {
        let good_calls = Arc::new(AtomicU32::new(0));
        let bad_calls = Arc::new(AtomicU32::new(0));

        let mut auditor = Auditor::new();
        auditor.add(Arc::new(RecordingObserver { calls: bad_calls.clone(), fail: true }));
        auditor.add(Arc::new(RecordingObserver { calls: good_calls.clone(), fail: false }));

        let err = auditor
            .log_event(vec!["hits".into()], "10.0.0.1".into())
            .await
            .unwrap_err();

        assert_eq!(good_calls.load(Ordering::SeqCst), 1);
        assert_eq!(bad_calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, AuditError::Composite { count: 1, .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn event_serializes_with_wire_field_names() {
        let event = AuditEvent {
            ts: 1700000000,
            metrics: vec!["hits".into(), "temp".into()],
            ip_address: "192.168.1.10".into(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["ts"], 1700000000);
        assert_eq!(json["metrics"][0], "hits");
        assert_eq!(json["ip_address"], "192.168.1.10");
    }
}
