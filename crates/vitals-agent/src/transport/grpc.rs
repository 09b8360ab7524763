use crate::local_ip::local_ip_for;
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use std::net::IpAddr;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use vitals_common::model::{MetricKind, MetricPayload};
use vitals_common::proto;
use vitals_common::proto::metrics_client::MetricsClient;

/// gRPC delivery: the endpoint is dialed once at construction and the channel
/// is reused for every batch.
pub struct GrpcTransport {
    client: MetricsClient<Channel>,
    local_ip: IpAddr,
}

fn to_proto(payload: &MetricPayload) -> proto::Metric {
    match payload.kind {
        MetricKind::Counter => proto::Metric {
            id: payload.id.clone(),
            r#type: proto::metric::Kind::Counter.into(),
            delta: payload.delta.unwrap_or(0),
            value: 0.0,
        },
        MetricKind::Gauge => proto::Metric {
            id: payload.id.clone(),
            r#type: proto::metric::Kind::Gauge.into(),
            delta: 0,
            value: payload.value.unwrap_or(0.0),
        },
    }
}

impl GrpcTransport {
    pub async fn new(address: &str) -> Result<Self, TransportError> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| TransportError::Endpoint(format!("{address}: {e}")))?;
        let channel = endpoint.connect().await?;

        let host = uri
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .split([':', '/'])
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::Endpoint(format!("{address}: missing host")))?
            .to_string();
        let local_ip = local_ip_for(&host)?;

        Ok(Self {
            client: MetricsClient::new(channel),
            local_ip,
        })
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn send_batch(&self, batch: &[MetricPayload]) -> Result<(), TransportError> {
        let metrics: Vec<proto::Metric> = batch.iter().map(to_proto).collect();
        let count = metrics.len();

        let mut request = tonic::Request::new(proto::UpdateMetricsRequest { metrics });
        let ip = MetadataValue::try_from(self.local_ip.to_string())
            .map_err(|e| TransportError::Metadata(e.to_string()))?;
        request.metadata_mut().insert("x-real-ip", ip);

        self.client.clone().update_metrics(request).await?;

        tracing::debug!(count, "batch sent over rpc");
        Ok(())
    }
}
