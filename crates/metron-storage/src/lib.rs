//! Aggregate storage for gauges and counters.
//!
//! Three backends implement [`AggregateStore`] with the same semantics
//! (gauges overwrite, counters accumulate):
//!
//! - [`memory::MemoryStore`] keeps everything in a locked [`Snapshot`].
//! - [`file::FileStore`] adds restore-on-start and JSON snapshots on disk.
//! - [`relational::RelationalStore`] upserts into `gauge` / `counter` tables
//!   through the [`sql::SqlExecutor`] capability.
//!
//! [`Snapshot`]: metron_common::snapshot::Snapshot

pub mod error;
pub mod file;
pub mod memory;
pub mod relational;
pub mod sql;
pub mod sqlite;


pub use error::{Result, StorageError};

use async_trait::async_trait;
use metron_common::types::MetricSet;
use tokio_util::sync::CancellationToken;

/// Storage backend for the latest gauge values and running counter sums.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Backend-specific setup (schema creation, snapshot restore). Called once
    /// before serving traffic. Background tasks started here stop when
    /// `shutdown` is cancelled.
    async fn init(&self, shutdown: CancellationToken) -> Result<()>;

    /// Overwrites the gauge `key`.
    async fn set_gauge(&self, key: &str, value: f64) -> Result<()>;

    /// Adds `delta` to the counter `key`, creating it at `delta` if absent.
    async fn add_counter(&self, key: &str, delta: i64) -> Result<()>;

    /// Fails with [`StorageError::NotFound`] if the gauge was never set.
    async fn get_gauge(&self, key: &str) -> Result<f64>;

    /// Fails with [`StorageError::NotFound`] if the counter was never set.
    async fn get_counter(&self, key: &str) -> Result<i64>;

    /// Returns an independent copy of every gauge and counter.
    async fn get_metrics(&self) -> Result<MetricSet>;

    /// Applies a whole batch as one unit: gauges overwrite and counters add,
    /// exactly as the single-key operations would.
    async fn set_metrics(&self, batch: &MetricSet) -> Result<()>;

    /// Waits for background work started by [`AggregateStore::init`] to wind
    /// down.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
