//! Applies incoming samples to the aggregate store and reads them back.

use metron_common::types::{MetricKind, MetricName, MetricSample, MetricSet, MetricValue, ValidationError};
use metron_storage::{AggregateStore, StorageError};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, IngestError>;

pub struct Ingestor {
    store: Arc<dyn AggregateStore>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    /// Validates the whole batch before touching the store, then applies it
    /// in one call. Returns the number of distinct metrics written.
    pub async fn apply_batch(&self, samples: &[MetricSample]) -> Result<usize> {
        let set = MetricSet::from_samples(samples)?;
        self.store.set_metrics(&set).await?;
        tracing::info!(
            samples = samples.len(),
            gauges = set.gauges.len(),
            counters = set.counters.len(),
            "Batch applied"
        );
        Ok(set.len())
    }

    /// Applies one sample and returns the metric's value after the update:
    /// the stored gauge, or the counter's accumulated total.
    pub async fn apply_sample(&self, sample: &MetricSample) -> Result<MetricSample> {
        match sample.validate()? {
            MetricValue::Gauge(value) => self.store.set_gauge(sample.id(), value).await?,
            MetricValue::Counter(delta) => self.store.add_counter(sample.id(), delta).await?,
        }
        self.value(&sample.name).await
    }

    pub async fn value(&self, name: &MetricName) -> Result<MetricSample> {
        name.validate()?;
        let sample = match name.kind {
            MetricKind::Gauge => MetricSample::gauge(name.id.clone(), self.store.get_gauge(&name.id).await?),
            MetricKind::Counter => MetricSample::counter(name.id.clone(), self.store.get_counter(&name.id).await?),
        };
        Ok(sample)
    }

    pub async fn all(&self) -> Result<MetricSet> {
        Ok(self.store.get_metrics().await?)
    }
}
