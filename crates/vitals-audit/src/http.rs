use crate::{AuditError, AuditEvent, Observer};
use async_trait::async_trait;
use reqwest::StatusCode;

/// POSTs each event as JSON to a configured endpoint. Anything other than a
/// 200 response is a failure.
pub struct HttpObserver {
    url: String,
    client: reqwest::Client,
}

impl HttpObserver {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Observer for HttpObserver {
    fn name(&self) -> &str {
        "http"
    }

    async fn notify(&self, event: AuditEvent) -> Result<(), AuditError> {
        tracing::debug!(
            metrics_num = event.metrics.len(),
            client_ip = %event.ip_address,
            "sending http audit event"
        );

        let response = self.client.post(&self.url).json(&event).send().await?;

        if response.status() != StatusCode::OK {
            return Err(AuditError::BadStatus(response.status().as_u16()));
        }

        Ok(())
    }
}
