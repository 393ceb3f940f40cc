//! Host sampling for the pulsemon agent.
//!
//! Each [`Collector`] reads one category of host counters (memory, cpu,
//! load, disk, network) and returns fixed-name [`Reading`]s. The
//! [`RuntimeSampler`] runs all of them and folds the result into the shared
//! [`snapshot::MetricSnapshot`] that the reporter later reads.

pub mod cpu;
pub mod disk;
pub mod load;
pub mod memory;
pub mod network;
pub mod snapshot;

use anyhow::Result;
use snapshot::MetricSnapshot;

/// One gauge reading produced by a collector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub name: &'static str,
    pub value: f64,
}

impl Reading {
    pub fn new(name: &'static str, value: f64) -> Self {
        Self { name, value }
    }
}

/// Gauge refreshed with a random value on every poll.
pub const RANDOM_VALUE: &str = "RandomValue";

/// Counter incremented on every poll.
pub const POLL_COUNT: &str = "PollCount";

/// Every gauge the agent reports. The set is fixed so the server needs no
/// schema exchange; collectors may only emit names from this list.
pub const GAUGE_NAMES: &[&str] = &[
    memory::TOTAL_MEMORY,
    memory::USED_MEMORY,
    memory::FREE_MEMORY,
    memory::AVAILABLE_MEMORY,
    memory::TOTAL_SWAP,
    memory::USED_SWAP,
    cpu::CPU_UTILIZATION,
    cpu::CPU_COUNT,
    load::LOAD_AVERAGE_1,
    load::LOAD_AVERAGE_5,
    load::LOAD_AVERAGE_15,
    load::UPTIME,
    disk::DISK_TOTAL,
    disk::DISK_AVAILABLE,
    network::NET_BYTES_RECEIVED,
    network::NET_BYTES_SENT,
    RANDOM_VALUE,
];

/// A host metric collector that runs on the agent.
///
/// The trait requires `Send + Sync` so the sampler can live inside the
/// collector task.
pub trait Collector: Send + Sync {
    /// Returns the collector name (e.g., `"cpu"`), used for logging.
    fn name(&self) -> &str;

    /// Reads current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn collect(&mut self) -> Result<Vec<Reading>>;
}

/// Owns the collectors and refreshes a [`MetricSnapshot`] from them.
pub struct RuntimeSampler {
    collectors: Vec<Box<dyn Collector>>,
}

impl RuntimeSampler {
    pub fn new(collectors: Vec<Box<dyn Collector>>) -> Self {
        Self { collectors }
    }

    /// Sampler over every built-in host collector.
    pub fn with_default_collectors() -> Self {
        Self::new(vec![
            Box::new(memory::MemoryCollector::new()),
            Box::new(cpu::CpuCollector::new()),
            Box::new(load::LoadCollector::new()),
            Box::new(disk::DiskCollector::new()),
            Box::new(network::NetworkCollector::new()),
        ])
    }

    /// Reads every collector. A failing collector is logged and skipped; its
    /// gauges keep their previous values.
    pub fn sample(&mut self) -> Vec<Reading> {
        let mut readings = Vec::with_capacity(GAUGE_NAMES.len());
        for collector in &mut self.collectors {
            match collector.collect() {
                Ok(points) => readings.extend(points),
                Err(e) => {
                    tracing::warn!(collector = collector.name(), error = %e, "Collection failed")
                }
            }
        }
        readings
    }

    /// Samples the host and records the result in `snapshot`. The snapshot
    /// lock is only taken after all readings are in hand.
    pub fn collect(&mut self, snapshot: &MetricSnapshot) {
        let readings = self.sample();
        tracing::debug!(count = readings.len(), "Collected readings");
        snapshot.record(&readings);
    }
}
