use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use vitals_collector::{Poller, TickCounter};
use vitals_common::model::Metric;

/// Runs one poller on a fixed cadence: once immediately, then on every tick.
///
/// The shared tick counter is incremented before each poll so the custom
/// poller's `PollCount` reflects ticks across all loops. Samples transfer
/// ownership into the bounded channel; a full channel blocks the loop rather
/// than dropping.
pub async fn poll_loop(
    mut poller: Box<dyn Poller>,
    out: mpsc::Sender<Metric>,
    ticks: Arc<TickCounter>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    tracing::info!(poller = poller.name(), "poll loop started");

    ticks.increment();
    if !emit(poller.as_mut(), &out, &mut shutdown).await? {
        return Ok(());
    }

    let start = tokio::time::Instant::now() + interval;
    let mut tick = tokio::time::interval_at(start, interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!(poller = poller.name(), "poll loop stopped");
                return Ok(());
            }
            _ = tick.tick() => {
                ticks.increment();
                if !emit(poller.as_mut(), &out, &mut shutdown).await? {
                    return Ok(());
                }
            }
        }
    }
}

/// Pushes one round of samples. Returns `Ok(false)` when the pipeline is
/// draining and the loop should end quietly.
async fn emit(
    poller: &mut dyn Poller,
    out: &mpsc::Sender<Metric>,
    shutdown: &mut watch::Receiver<bool>,
) -> anyhow::Result<bool> {
    let samples = poller
        .poll_once()
        .with_context(|| format!("poller {} failed", poller.name()))?;

    for sample in samples {
        tokio::select! {
            _ = shutdown.changed() => return Ok(false),
            sent = out.send(sample) => {
                if sent.is_err() {
                    // receiver is gone, the pipeline is already shutting down
                    return Ok(false);
                }
            }
        }
    }

    Ok(true)
}
