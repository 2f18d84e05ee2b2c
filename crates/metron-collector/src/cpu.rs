use crate::Collector;
use anyhow::Result;
use metron_common::types::MetricSample;
use sysinfo::System;

/// Overall utilization as `CPUutilization`, and one `CPUutilization{n}`
/// gauge per core numbered from 1.
pub struct CpuCollector {
    system: System,
}

impl CpuCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn collect(&mut self) -> Result<Vec<MetricSample>> {
        self.system.refresh_cpu_all();

        let mut samples = vec![MetricSample::gauge(
            "CPUutilization",
            self.system.global_cpu_usage() as f64,
        )];
        samples.extend(
            self.system
                .cpus()
                .iter()
                .enumerate()
                .map(|(i, cpu)| MetricSample::gauge(format!("CPUutilization{}", i + 1), cpu.cpu_usage() as f64)),
        );
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_gauges_are_numbered_from_one() {
        let samples = CpuCollector::new().collect().unwrap();
        assert_eq!(samples[0].id(), "CPUutilization");
        if samples.len() > 1 {
            assert_eq!(samples[1].id(), "CPUutilization1");
        }
        assert!(samples.iter().all(|s| s.validate().is_ok()));
    }
}
