use crate::{Collector, Reading};
use anyhow::Result;
use sysinfo::System;

pub const TOTAL_MEMORY: &str = "TotalMemory";
pub const USED_MEMORY: &str = "UsedMemory";
pub const FREE_MEMORY: &str = "FreeMemory";
pub const AVAILABLE_MEMORY: &str = "AvailableMemory";
pub const TOTAL_SWAP: &str = "TotalSwap";
pub const USED_SWAP: &str = "UsedSwap";

pub struct MemoryCollector {
    system: System,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        "memory"
    }

    fn collect(&mut self) -> Result<Vec<Reading>> {
        self.system.refresh_memory();

        Ok(vec![
            Reading::new(TOTAL_MEMORY, self.system.total_memory() as f64),
            Reading::new(USED_MEMORY, self.system.used_memory() as f64),
            Reading::new(FREE_MEMORY, self.system.free_memory() as f64),
            Reading::new(AVAILABLE_MEMORY, self.system.available_memory() as f64),
            Reading::new(TOTAL_SWAP, self.system.total_swap() as f64),
            Reading::new(USED_SWAP, self.system.used_swap() as f64),
        ])
    }
}
