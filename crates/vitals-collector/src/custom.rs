use crate::{Poller, TickCounter};
use anyhow::Result;
use rand::Rng;
use std::sync::Arc;
use vitals_common::model::Metric;

/// Emits the `RandomValue` gauge and the `PollCount` counter.
///
/// `PollCount` drains the shared tick counter, so each emission carries the
/// number of ticks observed since the previous one.
pub struct CustomPoller {
    ticks: Arc<TickCounter>,
}

impl CustomPoller {
    pub fn new(ticks: Arc<TickCounter>) -> Self {
        Self { ticks }
    }
}

impl Poller for CustomPoller {
    fn name(&self) -> &str {
        "custom"
    }

    fn poll_once(&mut self) -> Result<Vec<Metric>> {
        let random_value = rand::thread_rng().gen_range(0..100);

        Ok(vec![
            Metric::Gauge {
                id: "RandomValue".to_string(),
                value: f64::from(random_value),
            },
            Metric::Counter {
                id: "PollCount".to_string(),
                value: self.ticks.take(),
            },
        ])
    }
}
