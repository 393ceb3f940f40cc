use crate::{Collector, Reading};
use anyhow::Result;
use sysinfo::System;

pub const LOAD_AVERAGE_1: &str = "LoadAverage1";
pub const LOAD_AVERAGE_5: &str = "LoadAverage5";
pub const LOAD_AVERAGE_15: &str = "LoadAverage15";
pub const UPTIME: &str = "Uptime";

pub struct LoadCollector;

impl LoadCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoadCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for LoadCollector {
    fn name(&self) -> &str {
        "load"
    }

    fn collect(&mut self) -> Result<Vec<Reading>> {
        let load_avg = System::load_average();

        Ok(vec![
            Reading::new(LOAD_AVERAGE_1, load_avg.one),
            Reading::new(LOAD_AVERAGE_5, load_avg.five),
            Reading::new(LOAD_AVERAGE_15, load_avg.fifteen),
            Reading::new(UPTIME, System::uptime() as f64),
        ])
    }
}
