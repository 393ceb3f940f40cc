//! Collector, generator and worker pool.
//!
//! The collector refreshes the shared [`MetricSnapshot`] every poll tick.
//! The generator copies the snapshot every report tick into a bounded
//! channel sized to the worker count, and waits when it is full. Each worker
//! submits one task at a time under the retry schedule and a per-attempt
//! deadline.

use crate::error::SendError;
use crate::transport::Transport;
use pulsemon_collector::snapshot::MetricSnapshot;
use pulsemon_collector::RuntimeSampler;
use pulsemon_common::error::Classify;
use pulsemon_common::retry::RetryPolicy;
use pulsemon_common::types::Metric;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// One report: the snapshot copy taken at a report tick.
#[derive(Debug, Clone)]
pub struct Task {
    pub seq: u64,
    pub metrics: Vec<Metric>,
}

/// Pipeline timing and fan-out.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub workers: usize,
    pub context_timeout: Duration,
    pub retry: RetryPolicy,
}

/// Running totals shared by the generator and the workers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    generated: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl PipelineStats {
    /// Tasks accepted into the queue.
    pub fn generated(&self) -> u64 {
        self.generated.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Tasks abandoned after the retry schedule ran out.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

struct Submitter {
    transport: Arc<dyn Transport>,
    context_timeout: Duration,
    retry: RetryPolicy,
}

impl Submitter {
    async fn attempt(&self, task: &Task, attempt: usize) -> Result<(), SendError> {
        tracing::trace!(seq = task.seq, attempt, "Sending batch");
        match tokio::time::timeout(self.context_timeout, self.transport.send(&task.metrics)).await {
            Ok(res) => res,
            Err(_) => Err(SendError::Timeout(self.context_timeout)),
        }
    }

    async fn submit(&self, task: &Task) -> Result<(), SendError> {
        self.retry
            .run(self.transport.name(), |attempt| self.attempt(task, attempt))
            .await
    }
}

/// The running agent engine.
pub struct Pipeline {
    settings: PipelineSettings,
    snapshot: Arc<MetricSnapshot>,
    submitter: Arc<Submitter>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, transport: Arc<dyn Transport>) -> Self {
        let submitter = Arc::new(Submitter {
            transport,
            context_timeout: settings.context_timeout,
            retry: settings.retry.clone(),
        });
        Self {
            settings,
            snapshot: Arc::new(MetricSnapshot::new()),
            submitter,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    pub fn snapshot(&self) -> Arc<MetricSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Runs until `shutdown` flips to `true`, then lets queued tasks drain
    /// and returns once every worker has finished.
    pub async fn run(self, sampler: RuntimeSampler, shutdown: watch::Receiver<bool>) {
        let workers = self.settings.workers.max(1);
        let (tx, rx) = mpsc::channel::<Task>(workers);
        let rx = Arc::new(Mutex::new(rx));
        let mut tasks = JoinSet::new();

        tasks.spawn(collect_loop(
            sampler,
            Arc::clone(&self.snapshot),
            self.settings.poll_interval,
            shutdown.clone(),
        ));
        tasks.spawn(generate_loop(
            Arc::clone(&self.snapshot),
            self.settings.report_interval,
            tx,
            Arc::clone(&self.stats),
            shutdown,
        ));
        for id in 0..workers {
            tasks.spawn(worker_loop(
                id,
                Arc::clone(&rx),
                Arc::clone(&self.submitter),
                Arc::clone(&self.stats),
            ));
        }

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "Agent task panicked");
            }
        }
        tracing::info!(
            generated = self.stats.generated(),
            delivered = self.stats.delivered(),
            dropped = self.stats.dropped(),
            "Agent pipeline stopped"
        );
    }
}

async fn collect_loop(
    mut sampler: RuntimeSampler,
    snapshot: Arc<MetricSnapshot>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => sampler.collect(&snapshot),
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!(polls = snapshot.poll_count(), "Collector stopped");
}

async fn generate_loop(
    snapshot: Arc<MetricSnapshot>,
    period: Duration,
    tx: mpsc::Sender<Task>,
    stats: Arc<PipelineStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut seq = 0u64;
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.changed() => break,
        }
        seq += 1;
        let task = Task {
            seq,
            metrics: snapshot.read_all(),
        };
        // A full queue holds the generator here until a worker frees a slot.
        // A task still waiting for a slot at shutdown is never queued.
        tokio::select! {
            res = tx.send(task) => {
                if res.is_err() {
                    break;
                }
                stats.generated.fetch_add(1, Ordering::SeqCst);
            }
            _ = shutdown.changed() => {
                tracing::debug!(seq, "Report skipped at shutdown");
                break;
            }
        }
    }
    tracing::debug!(generated = stats.generated(), "Generator stopped");
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    submitter: Arc<Submitter>,
    stats: Arc<PipelineStats>,
) {
    loop {
        let task = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(task) = task else {
            break;
        };
        match submitter.submit(&task).await {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(worker = id, seq = task.seq, "Batch delivered");
            }
            Err(e) => {
                stats.dropped.fetch_add(1, Ordering::SeqCst);
                tracing::error!(
                    worker = id,
                    seq = task.seq,
                    kind = %e.kind(),
                    error = %e,
                    "Batch dropped"
                );
            }
        }
    }
    tracing::debug!(worker = id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulsemon_collector::POLL_COUNT;
    use pulsemon_common::error::ErrorKind;
    use std::sync::atomic::AtomicUsize;

    /// Records every call and fails the first `failures` of them.
    struct MockTransport {
        calls: AtomicUsize,
        failures: usize,
        failure: fn() -> SendError,
        delay: Duration,
        delivered: std::sync::Mutex<Vec<Task>>,
    }

    impl MockTransport {
        fn new(failures: usize, failure: fn() -> SendError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures,
                failure,
                delay: Duration::ZERO,
                delivered: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn ok() -> Self {
            Self::new(0, refused)
        }
    }

    fn refused() -> SendError {
        SendError::from(tonic::Status::unavailable("refused"))
    }

    fn rejected() -> SendError {
        SendError::from(tonic::Status::invalid_argument("bad metric"))
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn send(&self, metrics: &[Metric]) -> Result<(), SendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if n < self.failures {
                return Err((self.failure)());
            }
            let seq = n as u64;
            self.delivered.lock().unwrap().push(Task {
                seq,
                metrics: metrics.to_vec(),
            });
            Ok(())
        }
    }

    fn submitter(transport: Arc<MockTransport>) -> Submitter {
        Submitter {
            transport,
            context_timeout: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }

    fn task() -> Task {
        Task {
            seq: 1,
            metrics: vec![Metric::counter(POLL_COUNT, 1)],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_makes_four_attempts() {
        let transport = Arc::new(MockTransport::new(usize::MAX, refused));
        let started = Instant::now();
        let err = submitter(Arc::clone(&transport)).submit(&task()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(9));
        assert!(elapsed < Duration::from_millis(9100));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_is_not_retried() {
        let transport = Arc::new(MockTransport::new(usize::MAX, rejected));
        let err = submitter(Arc::clone(&transport)).submit(&task()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputInvalid);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_a_later_attempt() {
        let transport = Arc::new(MockTransport::new(2, refused));
        submitter(Arc::clone(&transport)).submit(&task()).await.unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(transport.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_transport_hits_the_deadline() {
        let mut mock = MockTransport::ok();
        mock.delay = Duration::from_secs(2);
        let transport = Arc::new(mock);
        let err = submitter(Arc::clone(&transport)).submit(&task()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_reports_until_shutdown() {
        let transport = Arc::new(MockTransport::ok());
        let settings = PipelineSettings {
            poll_interval: Duration::from_secs(1),
            report_interval: Duration::from_secs(2),
            workers: 2,
            context_timeout: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        };
        let pipeline = Pipeline::new(settings, transport.clone());
        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(pipeline.run(RuntimeSampler::new(Vec::new()), shutdown));

        tokio::time::sleep(Duration::from_millis(6500)).await;
        stop.send(true).unwrap();
        handle.await.unwrap();

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 3);
        let polls: Vec<i64> = delivered
            .iter()
            .map(|t| {
                t.metrics
                    .iter()
                    .find(|m| m.id == POLL_COUNT)
                    .and_then(|m| m.delta)
                    .unwrap()
            })
            .collect();
        assert!(polls.iter().all(|p| *p >= 1));
        assert!(polls.iter().max() > polls.iter().min());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_transport_holds_back_the_generator() {
        let mut mock = MockTransport::ok();
        mock.delay = Duration::from_secs(3);
        let transport = Arc::new(mock);
        let settings = PipelineSettings {
            poll_interval: Duration::from_secs(1),
            report_interval: Duration::from_secs(1),
            workers: 1,
            context_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        };
        let pipeline = Pipeline::new(settings, transport.clone());
        let stats = pipeline.stats();
        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(pipeline.run(RuntimeSampler::new(Vec::new()), shutdown));

        // Sample between ticks. One queued slot plus the task in flight.
        let mut peak = 0;
        tokio::time::sleep(Duration::from_millis(250)).await;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let delivered = transport.delivered.lock().unwrap().len() as u64;
            let pending = stats.generated().saturating_sub(delivered);
            assert!(pending <= 2, "{pending} reports pending behind one worker");
            peak = peak.max(pending);
        }
        assert_eq!(peak, 2);
        let generated_while_busy = stats.generated();
        // Deliveries land every 3s over 20s of ticking.
        assert!(generated_while_busy <= 8);

        stop.send(true).unwrap();
        handle.await.unwrap();

        assert!(stats.generated() >= generated_while_busy);
        assert_eq!(stats.delivered(), stats.generated());
        assert_eq!(stats.dropped(), 0);
        assert_eq!(
            transport.delivered.lock().unwrap().len() as u64,
            stats.generated()
        );
    }
}
