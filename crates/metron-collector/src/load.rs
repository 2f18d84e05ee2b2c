use crate::Collector;
use anyhow::Result;
use metron_common::types::MetricSample;
use sysinfo::System;

pub struct LoadCollector;

impl LoadCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoadCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for LoadCollector {
    fn name(&self) -> &str {
        "load"
    }

    fn collect(&mut self) -> Result<Vec<MetricSample>> {
        let load = System::load_average();
        Ok(vec![
            MetricSample::gauge("LoadAverage1", load.one),
            MetricSample::gauge("LoadAverage5", load.five),
            MetricSample::gauge("LoadAverage15", load.fifteen),
            MetricSample::gauge("Uptime", System::uptime() as f64),
        ])
    }
}
