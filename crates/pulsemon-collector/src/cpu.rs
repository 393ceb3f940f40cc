use crate::{Collector, Reading};
use anyhow::Result;
use sysinfo::System;

/// Global CPU utilisation in percent.
pub const CPU_UTILIZATION: &str = "CPUutilization1";
pub const CPU_COUNT: &str = "CPUCount";

pub struct CpuCollector {
    system: System,
}

impl CpuCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn collect(&mut self) -> Result<Vec<Reading>> {
        self.system.refresh_cpu_all();

        Ok(vec![
            Reading::new(CPU_UTILIZATION, self.system.global_cpu_usage() as f64),
            Reading::new(CPU_COUNT, self.system.cpus().len() as f64),
        ])
    }
}
