//! Host metric sampling for the metron agent.
//!
//! Each [`Collector`] implementation reads one category of host figures
//! (CPU, memory, disk, network, load) and returns them as
//! [`MetricSample`]s. The [`Sampler`] runs every collector once per poll
//! tick and writes the results into the agent's [`Snapshot`].

pub mod cpu;
pub mod disk;
pub mod load;
pub mod memory;
pub mod network;

use anyhow::Result;
use metron_common::snapshot::Snapshot;
use metron_common::types::{MetricSample, MetricValue};
use rand::Rng;

/// Counter incremented once per sample tick.
pub const POLL_COUNT: &str = "PollCount";
/// Gauge set to a fresh random value on every tick.
pub const RANDOM_VALUE: &str = "RandomValue";

/// A host metric collector that runs on the agent.
///
/// Implementations are registered with a [`Sampler`] and called at each poll
/// interval. The trait requires `Send + Sync` so the sampler can be moved
/// into worker jobs.
pub trait Collector: Send + Sync {
    /// Returns the collector name (e.g., `"cpu"`, `"disk"`), used for logging.
    fn name(&self) -> &str;

    /// Collects current metric values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn collect(&mut self) -> Result<Vec<MetricSample>>;
}

pub struct Sampler {
    collectors: Vec<Box<dyn Collector>>,
}

impl Sampler {
    pub fn new(collectors: Vec<Box<dyn Collector>>) -> Self {
        Self { collectors }
    }

    /// CPU, memory, disk, network and load collectors.
    pub fn with_host_collectors() -> Self {
        Self::new(vec![
            Box::new(cpu::CpuCollector::new()),
            Box::new(memory::MemoryCollector::new()),
            Box::new(disk::DiskCollector::new()),
            Box::new(network::NetworkCollector::new()),
            Box::new(load::LoadCollector::new()),
        ])
    }

    /// Runs every collector and records the results in `snapshot`.
    ///
    /// A failing collector is logged and skipped; the tick itself always
    /// bumps [`POLL_COUNT`] and refreshes [`RANDOM_VALUE`]. Returns the
    /// number of samples written.
    pub fn sample_into(&mut self, snapshot: &Snapshot) -> usize {
        let mut written = 0;
        for collector in &mut self.collectors {
            let samples = match collector.collect() {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::warn!(collector = collector.name(), error = %e, "Collection failed");
                    continue;
                }
            };
            for sample in samples {
                match sample.validate() {
                    Ok(MetricValue::Gauge(v)) => snapshot.set_gauge(sample.id(), v),
                    Ok(MetricValue::Counter(d)) => snapshot.add_counter(sample.id(), d),
                    Err(e) => {
                        tracing::warn!(collector = collector.name(), error = %e, "Dropping invalid sample");
                        continue;
                    }
                }
                written += 1;
            }
        }

        snapshot.set_gauge(RANDOM_VALUE, rand::thread_rng().gen::<f64>());
        snapshot.add_counter(POLL_COUNT, 1);
        tracing::debug!(count = written + 2, "Sampled metrics");
        written + 2
    }
}
