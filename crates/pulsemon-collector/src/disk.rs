use crate::{Collector, Reading};
use anyhow::Result;
use sysinfo::Disks;

/// Summed over all mounted disks, in bytes.
pub const DISK_TOTAL: &str = "DiskTotal";
pub const DISK_AVAILABLE: &str = "DiskAvailable";

pub struct DiskCollector {
    disks: Disks,
}

impl DiskCollector {
    pub fn new() -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
        }
    }
}

impl Default for DiskCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for DiskCollector {
    fn name(&self) -> &str {
        "disk"
    }

    fn collect(&mut self) -> Result<Vec<Reading>> {
        self.disks.refresh();

        let (total, available) = self
            .disks
            .iter()
            .fold((0u64, 0u64), |(total, available), disk| {
                (
                    total.saturating_add(disk.total_space()),
                    available.saturating_add(disk.available_space()),
                )
            });

        Ok(vec![
            Reading::new(DISK_TOTAL, total as f64),
            Reading::new(DISK_AVAILABLE, available as f64),
        ])
    }
}
