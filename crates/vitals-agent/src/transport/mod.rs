//! Batch delivery to the server over HTTP/JSON or gRPC.

pub mod grpc;
pub mod http;

use async_trait::async_trait;
use vitals_common::envelope::EnvelopeError;
use vitals_common::model::MetricPayload;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("failed to resolve source address: {0}")]
    SourceAddress(#[from] std::io::Error),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("non-ok status code: {0}")]
    BadStatus(u16),

    #[error("failed to dial rpc endpoint: {0}")]
    Dial(#[from] tonic::transport::Error),

    #[error("invalid rpc endpoint: {0}")]
    Endpoint(String),

    #[error("invalid rpc metadata: {0}")]
    Metadata(String),

    #[error("rpc call failed: {0}")]
    Rpc(#[from] tonic::Status),
}

/// A transport is the reporter's single delivery capability: ship one batch,
/// and release resources at shutdown. `close` is idempotent.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_batch(&self, batch: &[MetricPayload]) -> Result<(), TransportError>;

    async fn close(&self) {}
}
