use crate::{AggregateStore, Result, StorageError};
use async_trait::async_trait;
use metron_common::snapshot::Snapshot;
use metron_common::types::{MetricKind, MetricSet};
use tokio_util::sync::CancellationToken;

/// Backend holding everything in a single [`Snapshot`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Snapshot,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn init(&self, _shutdown: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn set_gauge(&self, key: &str, value: f64) -> Result<()> {
        self.snapshot.set_gauge(key, value);
        Ok(())
    }

    async fn add_counter(&self, key: &str, delta: i64) -> Result<()> {
        self.snapshot.add_counter(key, delta);
        Ok(())
    }

    async fn get_gauge(&self, key: &str) -> Result<f64> {
        self.snapshot.gauge(key).ok_or_else(|| StorageError::NotFound {
            kind: MetricKind::Gauge,
            key: key.to_string(),
        })
    }

    async fn get_counter(&self, key: &str) -> Result<i64> {
        self.snapshot.counter(key).ok_or_else(|| StorageError::NotFound {
            kind: MetricKind::Counter,
            key: key.to_string(),
        })
    }

    async fn get_metrics(&self) -> Result<MetricSet> {
        Ok(self.snapshot.copy())
    }

    async fn set_metrics(&self, batch: &MetricSet) -> Result<()> {
        self.snapshot.apply(batch);
        Ok(())
    }
}
