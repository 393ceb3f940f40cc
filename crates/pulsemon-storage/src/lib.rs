//! Latest-value metric store for the pulsemon server.
//!
//! Two backends sit behind the [`Storage`] capability trait:
//! [`memory::MemStorage`] keeps gauges and counters in maps and persists
//! them to a JSON snapshot file, [`sql::SqlStorage`] keeps one row per
//! metric in a `metrics` table reached through SeaORM (SQLite or
//! PostgreSQL, chosen by the DSN).

pub mod entities;
pub mod error;
pub mod memory;
pub mod sql;

#[cfg(test)]
mod tests;

pub use error::{Result, StorageError};
pub use memory::MemStorage;
pub use sql::SqlStorage;

use async_trait::async_trait;
use pulsemon_common::types::{Metric, MetricKind};

/// Persistence backend for the metric store.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because the store is used from HTTP handlers, the gRPC service and the
/// snapshot flusher concurrently.
///
/// Gauge writes replace the stored value, counter writes add their delta.
/// A write whose kind differs from the stored kind replaces the old entry.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Applies one metric and returns the stored result (for counters, the
    /// accumulated total).
    async fn add(&self, metric: &Metric) -> Result<Metric>;

    /// Applies every metric in slice order, all or nothing. The batch is
    /// validated before anything is written.
    async fn add_batch(&self, metrics: &[Metric]) -> Result<()>;

    /// Looks up a metric by kind and id. A metric stored under another kind
    /// is reported as absent.
    async fn get(&self, kind: MetricKind, id: &str) -> Result<Option<Metric>>;

    /// Returns every stored metric ordered by id.
    async fn get_all(&self) -> Result<Vec<Metric>>;

    /// Persists the current state where the backend keeps a snapshot file.
    async fn snapshot(&self) -> Result<()>;

    /// Loads state from the snapshot file where the backend keeps one.
    async fn restore(&self) -> Result<()>;

    /// Checks that the backing database is reachable.
    async fn ping(&self) -> Result<()>;

    /// Releases backend resources. Callers flush with [`Storage::snapshot`]
    /// first.
    async fn close(&self) -> Result<()>;
}
