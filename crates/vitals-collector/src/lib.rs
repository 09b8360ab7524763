//! Samplers feeding the agent pipeline.
//!
//! Each poller enumerates its current readings as owned [`Metric`] samples.
//! The poll loop in the agent owns the tick cadence; pollers only produce.

pub mod custom;
pub mod host;
pub mod runtime;

use anyhow::Result;
use std::sync::atomic::{AtomicI64, Ordering};
use vitals_common::model::Metric;

pub trait Poller: Send {
    fn name(&self) -> &str;
    fn poll_once(&mut self) -> Result<Vec<Metric>>;
}

/// Monotonic count of poll ticks since the last report.
///
/// Every poll loop increments it on each tick; the custom poller drains it
/// with [`TickCounter::take`] so the emitted `PollCount` counter reflects
/// exactly the ticks since its previous emission.
#[derive(Debug, Default)]
pub struct TickCounter(AtomicI64);

impl TickCounter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    pub fn take(&self) -> i64 {
        self.0.swap(0, Ordering::AcqRel)
    }
}
