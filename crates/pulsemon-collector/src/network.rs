use crate::{Collector, Reading};
use anyhow::Result;
use sysinfo::Networks;

/// Cumulative bytes over all interfaces since boot.
pub const NET_BYTES_RECEIVED: &str = "NetBytesReceived";
pub const NET_BYTES_SENT: &str = "NetBytesSent";

pub struct NetworkCollector {
    networks: Networks,
}

impl NetworkCollector {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
        }
    }
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for NetworkCollector {
    fn name(&self) -> &str {
        "network"
    }

    fn collect(&mut self) -> Result<Vec<Reading>> {
        self.networks.refresh();

        let mut received = 0u64;
        let mut sent = 0u64;
        for (_, data) in self.networks.iter() {
            received = received.saturating_add(data.total_received());
            sent = sent.saturating_add(data.total_transmitted());
        }

        Ok(vec![
            Reading::new(NET_BYTES_RECEIVED, received as f64),
            Reading::new(NET_BYTES_SENT, sent as f64),
        ])
    }
}
