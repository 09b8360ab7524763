use crate::subnet::TrustedSubnet;
use anyhow::Context;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use vitals_common::model::Metric;
use vitals_common::proto;
use vitals_common::proto::metrics_server::{Metrics, MetricsServer};
use vitals_storage::Storage;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct MetricsService {
    storage: Arc<dyn Storage>,
}

impl MetricsService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[tonic::async_trait]
impl Metrics for MetricsService {
    async fn update_metrics(
        &self,
        request: Request<proto::UpdateMetricsRequest>,
    ) -> Result<Response<proto::UpdateMetricsResponse>, Status> {
        let incoming = request.into_inner().metrics;

        let mut metrics = Vec::with_capacity(incoming.len());
        for entry in incoming {
            let metric = match entry.r#type() {
                proto::metric::Kind::Counter => Metric::Counter {
                    id: entry.id,
                    value: entry.delta,
                },
                proto::metric::Kind::Gauge => Metric::Gauge {
                    id: entry.id,
                    value: entry.value,
                },
                proto::metric::Kind::Unspecified => {
                    return Err(Status::invalid_argument(format!(
                        "unknown metric type for {}",
                        entry.id
                    )));
                }
            };

            if metric.id().is_empty() {
                return Err(Status::invalid_argument("metric id is empty"));
            }
            metrics.push(metric);
        }

        let count = metrics.len();
        self.storage
            .set_or_update_metric_batch(metrics)
            .await
            .map_err(|e| Status::internal(format!("failed to update metrics: {e}")))?;

        tracing::info!(count, "metrics updated over rpc");
        Ok(Response::new(proto::UpdateMetricsResponse {}))
    }
}

/// Rejects calls without a parsable `x-real-ip` inside the trusted CIDR.
pub fn subnet_interceptor(
    subnet: TrustedSubnet,
) -> impl FnMut(Request<()>) -> Result<Request<()>, Status> + Clone {
    move |request: Request<()>| {
        let ip = request
            .metadata()
            .get("x-real-ip")
            .ok_or_else(|| Status::unauthenticated("x-real-ip not set"))?;

        let ip = ip
            .to_str()
            .ok()
            .and_then(|raw| raw.parse::<Ipv4Addr>().ok())
            .ok_or_else(|| Status::unauthenticated("failed to parse x-real-ip"))?;

        if !subnet.contains(ip) {
            return Err(Status::unauthenticated(format!(
                "access forbidden for ip {ip}"
            )));
        }

        Ok(request)
    }
}

/// Serves the RPC service until shutdown: graceful stop first, forced close
/// after the grace period.
pub async fn run(
    address: String,
    storage: Arc<dyn Storage>,
    subnet: Option<TrustedSubnet>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = tokio::net::lookup_host(&address)
        .await
        .with_context(|| format!("failed to resolve {address}"))?
        .next()
        .with_context(|| format!("no address for {address}"))?;

    tracing::info!(address = %addr, "rpc server started");

    let service = MetricsService::new(storage);
    let graceful = {
        let mut rx = shutdown.clone();
        async move {
            let _ = rx.changed().await;
        }
    };

    match subnet {
        Some(subnet) => {
            let server = Server::builder()
                .add_service(MetricsServer::with_interceptor(
                    service,
                    subnet_interceptor(subnet),
                ))
                .serve_with_shutdown(addr, graceful);
            finish(server, shutdown).await
        }
        None => {
            let server = Server::builder()
                .add_service(MetricsServer::new(service))
                .serve_with_shutdown(addr, graceful);
            finish(server, shutdown).await
        }
    }
}

async fn finish(
    server: impl std::future::Future<Output = Result<(), tonic::transport::Error>>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    tokio::select! {
        result = server => {
            result.context("rpc server error")?;
            tracing::info!("rpc server shut down gracefully");
            Ok(())
        }
        _ = async {
            let _ = shutdown.changed().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            tracing::warn!("rpc server forced to stop");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitals_storage::memory::MemoryStorage;

    fn proto_counter(id: &str, delta: i64) -> proto::Metric {
        proto::Metric {
            id: id.to_string(),
            r#type: proto::metric::Kind::Counter.into(),
            delta,
            value: 0.0,
        }
    }

    fn proto_gauge(id: &str, value: f64) -> proto::Metric {
        proto::Metric {
            id: id.to_string(),
            r#type: proto::metric::Kind::Gauge.into(),
            delta: 0,
            value,
        }
    }

    #[tokio::test]
    async fn update_metrics_applies_the_batch() {
        let storage = Arc::new(MemoryStorage::new());
        let service = MetricsService::new(storage.clone());

        let request = Request::new(proto::UpdateMetricsRequest {
            metrics: vec![
                proto_counter("hits", 5),
                proto_counter("hits", 5),
                proto_gauge("temp", 36.6),
            ],
        });
        service.update_metrics(request).await.unwrap();

        assert_eq!(
            storage.get_metric("hits").await.unwrap(),
            Metric::Counter { id: "hits".into(), value: 10 }
        );
        assert_eq!(
            storage.get_metric("temp").await.unwrap(),
            Metric::Gauge { id: "temp".into(), value: 36.6 }
        );
    }

    #[tokio::test]
    async fn unknown_kind_is_invalid_argument() {
        let service = MetricsService::new(Arc::new(MemoryStorage::new()));

        let request = Request::new(proto::UpdateMetricsRequest {
            metrics: vec![proto::Metric {
                id: "x".into(),
                r#type: proto::metric::Kind::Unspecified.into(),
                delta: 0,
                value: 0.0,
            }],
        });

        let status = service.update_metrics(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn type_conflict_is_internal() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set_or_update_metric(Metric::Counter { id: "x".into(), value: 1 })
            .await
            .unwrap();

        let service = MetricsService::new(storage);
        let request = Request::new(proto::UpdateMetricsRequest {
            metrics: vec![proto_gauge("x", 1.0)],
        });

        let status = service.update_metrics(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
    }

    #[test]
    fn interceptor_enforces_metadata_and_membership() {
        let subnet: TrustedSubnet = "10.0.0.0/8".parse().unwrap();
        let mut interceptor = subnet_interceptor(subnet);

        // no metadata
        let status = interceptor(Request::new(())).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);

        // malformed ip
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert("x-real-ip", "not-an-ip".parse().unwrap());
        let status = interceptor(request).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);

        // outside the subnet
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert("x-real-ip", "192.168.1.1".parse().unwrap());
        let status = interceptor(request).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);

        // member
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert("x-real-ip", "10.1.2.3".parse().unwrap());
        assert!(interceptor(request).is_ok());
    }
}
