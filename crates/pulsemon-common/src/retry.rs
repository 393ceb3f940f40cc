//! Bounded retry with a fixed back-off schedule.

use crate::error::Classify;
use std::future::Future;
use std::time::Duration;

/// Sleep before each attempt. The first entry is the delay before the first
/// attempt, so the schedule length is the attempt budget.
pub const DEFAULT_SCHEDULE: [Duration; 4] = [
    Duration::ZERO,
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    schedule: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_SCHEDULE.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule }
    }

    /// A policy that tries exactly once.
    pub fn once() -> Self {
        Self::new(vec![Duration::ZERO])
    }

    pub fn max_attempts(&self) -> usize {
        self.schedule.len().max(1)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// schedule is exhausted. `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Classify + std::fmt::Display,
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts();
        let mut attempt = 0;
        loop {
            let delay = self.schedule.get(attempt).copied().unwrap_or_default();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.kind().is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        op = label,
                        attempt,
                        kind = %e.kind(),
                        error = %e,
                        "Attempt failed, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}
