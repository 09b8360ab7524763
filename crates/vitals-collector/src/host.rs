use crate::Poller;
use anyhow::Result;
use sysinfo::System;
use vitals_common::model::Metric;

/// Samples host-wide memory and CPU utilization.
pub struct HostPoller {
    system: System,
}

impl HostPoller {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Poller for HostPoller {
    fn name(&self) -> &str {
        "host"
    }

    fn poll_once(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_memory();
        self.system.refresh_cpu_all();

        let cpu_utilization = self
            .system
            .cpus()
            .first()
            .map_or_else(|| self.system.global_cpu_usage(), |cpu| cpu.cpu_usage());

        let gauge = |id: &str, value: f64| Metric::Gauge {
            id: id.to_string(),
            value,
        };

        Ok(vec![
            gauge("TotalMemory", self.system.total_memory() as f64),
            gauge("FreeMemory", self.system.free_memory() as f64),
            gauge("CPUutilization1", f64::from(cpu_utilization)),
        ])
    }
}
