use crate::error::{Result, StorageError};
use crate::Storage;
use async_trait::async_trait;
use pulsemon_common::retry::RetryPolicy;
use pulsemon_common::types::{validate_batch, Metric, MetricKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct MemData {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

impl MemData {
    fn apply(&mut self, metric: &Metric) -> Metric {
        match metric.mtype {
            MetricKind::Gauge => {
                let value = metric.value.unwrap_or_default();
                self.counters.remove(&metric.id);
                self.gauges.insert(metric.id.clone(), value);
                Metric::gauge(metric.id.clone(), value)
            }
            MetricKind::Counter => {
                self.gauges.remove(&metric.id);
                let total = self.counters.entry(metric.id.clone()).or_insert(0);
                // Accumulation wraps on overflow.
                *total = total.wrapping_add(metric.delta.unwrap_or_default());
                Metric::counter(metric.id.clone(), *total)
            }
        }
    }

    fn all(&self) -> Vec<Metric> {
        let mut out: Vec<Metric> = self
            .gauges
            .iter()
            .map(|(id, v)| Metric::gauge(id.clone(), *v))
            .chain(self.counters.iter().map(|(id, d)| Metric::counter(id.clone(), *d)))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

/// In-memory store with an optional JSON snapshot file.
///
/// With `sync_flush` every mutation is followed by a snapshot; otherwise the
/// server's flusher task calls [`Storage::snapshot`] on its own schedule.
pub struct MemStorage {
    data: RwLock<MemData>,
    file: Option<PathBuf>,
    sync_flush: bool,
    retry: RetryPolicy,
    flush_guard: tokio::sync::Mutex<()>,
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStorage {
    /// A store that never touches the filesystem.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(MemData::default()),
            file: None,
            sync_flush: false,
            retry: RetryPolicy::once(),
            flush_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// A store persisted to `path`. Locked or read-only files are retried on
    /// the default schedule.
    pub fn with_snapshot_file(path: impl Into<PathBuf>, sync_flush: bool) -> Self {
        Self {
            file: Some(path.into()),
            sync_flush,
            retry: RetryPolicy::default(),
            ..Self::new()
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemData> {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemData> {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Synchronous flush after a mutation. The mutation is already applied,
    /// so a failed write is logged and left for the next flush.
    async fn after_mutation(&self) {
        if !self.sync_flush {
            return;
        }
        if let Err(e) = self.snapshot().await {
            tracing::error!(error = %e, "Snapshot after update failed, keeping the update");
        }
    }

    async fn write_file(path: &Path, body: &[u8]) -> Result<()> {
        tokio::fs::write(path, body)
            .await
            .map_err(|source| StorageError::Io {
                path: path.display().to_string(),
                source,
            })
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn add(&self, metric: &Metric) -> Result<Metric> {
        metric.validate()?;
        let stored = self.write().apply(metric);
        self.after_mutation().await;
        Ok(stored)
    }

    async fn add_batch(&self, metrics: &[Metric]) -> Result<()> {
        validate_batch(metrics)?;
        {
            let mut data = self.write();
            for metric in metrics {
                data.apply(metric);
            }
        }
        self.after_mutation().await;
        Ok(())
    }

    async fn get(&self, kind: MetricKind, id: &str) -> Result<Option<Metric>> {
        let data = self.read();
        Ok(match kind {
            MetricKind::Gauge => data.gauges.get(id).map(|v| Metric::gauge(id, *v)),
            MetricKind::Counter => data.counters.get(id).map(|d| Metric::counter(id, *d)),
        })
    }

    async fn get_all(&self) -> Result<Vec<Metric>> {
        Ok(self.read().all())
    }

    async fn snapshot(&self) -> Result<()> {
        let Some(path) = self.file.as_deref() else {
            return Ok(());
        };
        let _flush = self.flush_guard.lock().await;
        let metrics = self.read().all();
        let body = serde_json::to_vec_pretty(&metrics)?;
        self.retry
            .run("snapshot", |_| Self::write_file(path, &body))
            .await?;
        tracing::debug!(path = %path.display(), count = metrics.len(), "Snapshot written");
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        let Some(path) = self.file.as_deref() else {
            return Ok(());
        };
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No snapshot to restore");
                return Ok(());
            }
            Err(source) => {
                return Err(StorageError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let metrics: Vec<Metric> = serde_json::from_slice(&content)?;
        validate_batch(&metrics)?;

        let mut restored = MemData::default();
        for metric in &metrics {
            match metric.mtype {
                MetricKind::Gauge => {
                    restored.counters.remove(&metric.id);
                    restored
                        .gauges
                        .insert(metric.id.clone(), metric.value.unwrap_or_default());
                }
                MetricKind::Counter => {
                    restored.gauges.remove(&metric.id);
                    restored
                        .counters
                        .insert(metric.id.clone(), metric.delta.unwrap_or_default());
                }
            }
        }
        *self.write() = restored;
        tracing::info!(path = %path.display(), count = metrics.len(), "Snapshot restored");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Err(StorageError::Unsupported("ping"))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
