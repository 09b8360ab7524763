use crate::Poller;
use anyhow::{Context, Result};
use sysinfo::{Pid, ProcessesToUpdate, System};
use vitals_common::model::Metric;

/// Samples the agent's own process: memory footprint, CPU share and uptime.
pub struct RuntimePoller {
    system: System,
    pid: Pid,
}

impl RuntimePoller {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| anyhow::anyhow!("failed to resolve current pid: {e}"))?;
        Ok(Self {
            system: System::new(),
            pid,
        })
    }
}

impl Poller for RuntimePoller {
    fn name(&self) -> &str {
        "runtime"
    }

    fn poll_once(&mut self) -> Result<Vec<Metric>> {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let process = self
            .system
            .process(self.pid)
            .context("current process missing from snapshot")?;

        let gauge = |id: &str, value: f64| Metric::Gauge {
            id: id.to_string(),
            value,
        };

        Ok(vec![
            gauge("ResidentMemory", process.memory() as f64),
            gauge("VirtualMemory", process.virtual_memory() as f64),
            gauge("ProcessCpu", f64::from(process.cpu_usage())),
            gauge("RunTime", process.run_time() as f64),
        ])
    }
}
