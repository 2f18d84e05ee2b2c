use crate::Collector;
use anyhow::Result;
use metron_common::types::MetricSample;
use sysinfo::System;

pub struct MemoryCollector {
    system: System,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        "memory"
    }

    fn collect(&mut self) -> Result<Vec<MetricSample>> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let used = self.system.used_memory();
        let used_pct = if total > 0 {
            (used as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        Ok(vec![
            MetricSample::gauge("TotalMemory", total as f64),
            MetricSample::gauge("FreeMemory", self.system.free_memory() as f64),
            MetricSample::gauge("AvailableMemory", self.system.available_memory() as f64),
            MetricSample::gauge("UsedMemory", used as f64),
            MetricSample::gauge("UsedMemoryPercent", used_pct),
            MetricSample::gauge("TotalSwap", self.system.total_swap() as f64),
            MetricSample::gauge("UsedSwap", self.system.used_swap() as f64),
        ])
    }
}
