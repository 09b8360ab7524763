//! Agent wiring: pollers feed a bounded sample channel, the aggregator folds
//! samples into the store, the reporter ships snapshots on its own cadence.
//! One shutdown signal covers OS signals and the first task failure.

use crate::aggregator::Aggregator;
use crate::config::AgentConfig;
use crate::poll::poll_loop;
use crate::reporter::Reporter;
use crate::transport::grpc::GrpcTransport;
use crate::transport::http::HttpTransport;
use crate::transport::Transport;
use anyhow::{anyhow, Context};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use vitals_collector::custom::CustomPoller;
use vitals_collector::host::HostPoller;
use vitals_collector::runtime::RuntimePoller;
use vitals_collector::{Poller, TickCounter};
use vitals_storage::memory::MemoryStorage;

const SAMPLE_CHANNEL_CAPACITY: usize = 1024;

pub async fn run(config: AgentConfig) -> anyhow::Result<()> {
    let storage = Arc::new(MemoryStorage::new());
    let ticks = Arc::new(TickCounter::default());

    let transport: Arc<dyn Transport> = match &config.grpc_server_address {
        Some(addr) => Arc::new(
            GrpcTransport::new(addr)
                .await
                .context("failed to init rpc transport")?,
        ),
        None => Arc::new(
            HttpTransport::new(
                &config.address,
                config.secret_key.as_deref(),
                config.crypto_key.as_deref(),
            )
            .context("failed to init http transport")?,
        ),
    };

    let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pollers: Vec<Box<dyn Poller>> = vec![
        Box::new(RuntimePoller::new()?),
        Box::new(CustomPoller::new(ticks.clone())),
        Box::new(HostPoller::new()),
    ];

    let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();
    for poller in pollers {
        let out = sample_tx.clone();
        let ticks = ticks.clone();
        let shutdown = shutdown_rx.clone();
        let interval = config.poll_interval;
        tasks.spawn(async move { poll_loop(poller, out, ticks, interval, shutdown).await });
    }
    // only poll loops hold senders, so the aggregator sees a closed channel
    // once they all stop
    drop(sample_tx);

    let aggregator = Aggregator::new(storage.clone());
    let shutdown = shutdown_rx.clone();
    tasks.spawn(async move {
        aggregator
            .run(sample_rx, shutdown)
            .await
            .context("aggregator error")
    });

    let reporter = Reporter::new(storage, transport.clone(), config.rate_limit);
    let shutdown = shutdown_rx.clone();
    let report_interval = config.report_interval;
    tasks.spawn(async move {
        reporter
            .run(report_interval, shutdown)
            .await
            .context("reporter error")
    });

    let result = supervise(&mut tasks, &shutdown_tx).await;

    transport.close().await;
    if result.is_ok() {
        tracing::info!("agent shutdown");
    }
    result
}

/// Waits for a termination signal or the first task failure, trips the
/// shutdown channel, then drains the remaining tasks.
async fn supervise(
    tasks: &mut JoinSet<anyhow::Result<()>>,
    shutdown: &watch::Sender<bool>,
) -> anyhow::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let mut result = Ok(());
    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("interrupt received, draining");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("terminate received, draining");
                break;
            }
            _ = sigquit.recv() => {
                tracing::info!("quit received, draining");
                break;
            }
            joined = tasks.join_next() => match joined {
                None => return result,
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    tracing::error!(error = %e, "pipeline task failed");
                    result = Err(e);
                    break;
                }
                Some(Err(e)) => {
                    result = Err(anyhow!("pipeline task panicked: {e}"));
                    break;
                }
            }
        }
    }

    let _ = shutdown.send(true);

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if result.is_ok() {
                    result = Err(e);
                } else {
                    tracing::debug!(error = %e, "secondary task error during drain");
                }
            }
            Err(e) => tracing::debug!(error = %e, "task join error during drain"),
        }
    }

    result
}
