//! The shared blackboard between the collector task and the reporter.

use crate::{Reading, GAUGE_NAMES, POLL_COUNT, RANDOM_VALUE};
use pulsemon_common::types::Metric;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

struct SampleState {
    gauges: BTreeMap<&'static str, f64>,
    poll_count: i64,
}

/// Latest host sample: the fixed gauge set plus the `PollCount` counter.
///
/// The lock is only held to copy values in or out, never across I/O.
pub struct MetricSnapshot {
    state: Mutex<SampleState>,
}

impl Default for MetricSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSnapshot {
    /// Creates a snapshot with every known gauge at zero.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SampleState {
                gauges: GAUGE_NAMES.iter().map(|name| (*name, 0.0)).collect(),
                poll_count: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SampleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies one poll: replaces gauges from `readings`, randomizes
    /// `RandomValue` and increments `PollCount`. Names outside the fixed set
    /// are ignored.
    pub fn record(&self, readings: &[Reading]) {
        let random: f64 = rand::thread_rng().gen();
        let mut state = self.lock();
        for reading in readings {
            match state.gauges.get_mut(reading.name) {
                Some(slot) => *slot = reading.value,
                None => tracing::debug!(name = reading.name, "Ignoring unknown gauge"),
            }
        }
        state.gauges.insert(RANDOM_VALUE, random);
        state.poll_count += 1;
    }

    pub fn poll_count(&self) -> i64 {
        self.lock().poll_count
    }

    /// Copies out every metric, ordered by name so that encodings (and
    /// therefore signatures) of equal snapshots are identical.
    pub fn read_all(&self) -> Vec<Metric> {
        let mut metrics: Vec<Metric> = {
            let state = self.lock();
            let mut out: Vec<Metric> = state
                .gauges
                .iter()
                .map(|(name, value)| Metric::gauge(*name, *value))
                .collect();
            out.push(Metric::counter(POLL_COUNT, state.poll_count));
            out
        };
        metrics.sort_by(|a, b| a.id.cmp(&b.id));
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::TOTAL_MEMORY;
    use crate::{Collector, RuntimeSampler};
    use pulsemon_common::types::MetricKind;

    struct FixedCollector(f64);

    impl Collector for FixedCollector {
        fn name(&self) -> &str {
            "fixed"
        }

        fn collect(&mut self) -> anyhow::Result<Vec<Reading>> {
            Ok(vec![
                Reading::new(TOTAL_MEMORY, self.0),
                Reading::new("NotInTheSet", 1.0),
            ])
        }
    }

    struct BrokenCollector;

    impl Collector for BrokenCollector {
        fn name(&self) -> &str {
            "broken"
        }

        fn collect(&mut self) -> anyhow::Result<Vec<Reading>> {
            anyhow::bail!("no /proc")
        }
    }

    #[test]
    fn read_all_is_sorted_and_fixed() {
        let snapshot = MetricSnapshot::new();
        let metrics = snapshot.read_all();
        assert_eq!(metrics.len(), GAUGE_NAMES.len() + 1);
        assert!(metrics.windows(2).all(|w| w[0].id < w[1].id));
        let poll = metrics.iter().find(|m| m.id == POLL_COUNT).unwrap();
        assert_eq!(poll.mtype, MetricKind::Counter);
        assert!(metrics.iter().all(|m| m.validate().is_ok()));
    }

    #[test]
    fn collect_twice_counts_two_polls() {
        let snapshot = MetricSnapshot::new();
        let mut sampler = RuntimeSampler::new(vec![Box::new(FixedCollector(42.0))]);
        sampler.collect(&snapshot);
        sampler.collect(&snapshot);
        assert_eq!(snapshot.poll_count(), 2);

        let metrics = snapshot.read_all();
        let total = metrics.iter().find(|m| m.id == TOTAL_MEMORY).unwrap();
        assert_eq!(total.value, Some(42.0));
        assert!(metrics.iter().all(|m| m.id != "NotInTheSet"));
    }

    #[test]
    fn read_all_is_detached_from_later_polls() {
        let snapshot = MetricSnapshot::new();
        snapshot.record(&[]);
        let before = snapshot.read_all();
        snapshot.record(&[Reading::new(TOTAL_MEMORY, 7.0)]);

        let poll = before.iter().find(|m| m.id == POLL_COUNT).unwrap();
        assert_eq!(poll.delta, Some(1));
        let total = before.iter().find(|m| m.id == TOTAL_MEMORY).unwrap();
        assert_eq!(total.value, Some(0.0));
    }

    #[test]
    fn random_value_changes_between_polls() {
        let snapshot = MetricSnapshot::new();
        let random = |s: &MetricSnapshot| {
            s.read_all()
                .into_iter()
                .find(|m| m.id == RANDOM_VALUE)
                .and_then(|m| m.value)
                .unwrap()
        };
        snapshot.record(&[]);
        let first = random(&snapshot);
        snapshot.record(&[]);
        assert_ne!(first, random(&snapshot));
    }

    #[test]
    fn failing_collector_does_not_block_the_poll() {
        let snapshot = MetricSnapshot::new();
        let mut sampler =
            RuntimeSampler::new(vec![Box::new(BrokenCollector), Box::new(FixedCollector(3.0))]);
        sampler.collect(&snapshot);
        assert_eq!(snapshot.poll_count(), 1);
    }
}
