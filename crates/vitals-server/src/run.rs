//! Server wiring: storage selection, snapshot restore, the HTTP and RPC
//! listeners, the periodic snapshotter and the audit fan-out, all under one
//! shutdown signal.

use crate::app::{self, RouterOptions};
use crate::config::ServerConfig;
use crate::grpc;
use crate::state::AppState;
use anyhow::{anyhow, Context};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinSet;
use vitals_audit::file::FileObserver;
use vitals_audit::http::HttpObserver;
use vitals_audit::Auditor;
use vitals_common::envelope;
use vitals_storage::memory::MemoryStorage;
use vitals_storage::postgres::PostgresStorage;
use vitals_storage::snapshot::Snapshotter;
use vitals_storage::Storage;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let storage: Arc<dyn Storage> = match &config.database_dsn {
        Some(dsn) => Arc::new(
            PostgresStorage::new(dsn)
                .await
                .context("failed to connect to database")?,
        ),
        None => Arc::new(MemoryStorage::new()),
    };

    let mut auditor = Auditor::new();
    if let Some(path) = &config.audit_file {
        auditor.add(Arc::new(FileObserver::new(path)));
    }
    if let Some(url) = &config.audit_url {
        auditor.add(Arc::new(HttpObserver::new(url.clone())));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();

    // The snapshotter only backs the in-memory store.
    if config.database_dsn.is_none() {
        let snapshotter = Snapshotter::new(
            storage.clone(),
            config.file_storage_path.clone(),
            config.store_interval,
        );

        if config.restore {
            let restored = snapshotter
                .restore()
                .await
                .context("failed to restore metrics")?;
            tracing::info!(total = restored.len(), "metrics restored from file");
            storage
                .initialize(restored)
                .await
                .context("failed to initialize storage from snapshot")?;
        }

        let rx = shutdown_rx.clone();
        tasks.spawn(async move { snapshotter.run(rx).await.context("snapshotter error") });
    }

    let private_key = config
        .crypto_key
        .as_deref()
        .map(envelope::load_private_key)
        .transpose()
        .context("failed to load private key")?;

    let state = AppState {
        storage: storage.clone(),
        auditor: Arc::new(auditor),
    };
    let router = app::build_router(
        state,
        RouterOptions {
            secret_key: config.secret_key.as_ref().map(|k| k.as_bytes().to_vec()),
            private_key,
            trusted_subnet: config.trusted_subnet,
        },
    );

    {
        let address = config.address.clone();
        let rx = shutdown_rx.clone();
        tasks.spawn(async move { serve_http(address, router, rx).await });
    }

    if let Some(grpc_address) = config.grpc_server_address.clone() {
        let storage = storage.clone();
        let subnet = config.trusted_subnet;
        let rx = shutdown_rx.clone();
        tasks.spawn(async move {
            grpc::run(grpc_address, storage, subnet, rx)
                .await
                .context("rpc server error")
        });
    }

    let result = supervise(&mut tasks, &shutdown_tx).await;

    storage.close().await;
    if result.is_ok() {
        tracing::info!("server shut down");
    }
    result
}

/// Serves HTTP until shutdown: drain with a grace period, then force.
async fn serve_http(
    address: String,
    router: axum::Router,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    tracing::info!(address = %address, "http server started");

    let graceful = {
        let mut rx = shutdown.clone();
        async move {
            let _ = rx.changed().await;
        }
    };
    let server = axum::serve(listener, router).with_graceful_shutdown(graceful);

    let mut rx = shutdown;
    tokio::select! {
        result = server => {
            result.context("http server error")?;
            tracing::info!("http server shut down gracefully");
            Ok(())
        }
        _ = async {
            let _ = rx.changed().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            tracing::warn!("http server forced to close");
            Ok(())
        }
    }
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
                    tracing::error!(error = %e, "server task failed");
                    result = Err(e);
                    break;
                }
                Some(Err(e)) => {
                    result = Err(anyhow!("server task panicked: {e}"));
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
