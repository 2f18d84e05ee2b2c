use crate::Collector;
use anyhow::Result;
use metron_common::types::MetricSample;
use sysinfo::Disks;

/// Space per mount point, named `DiskTotal:{mount}` and so on.
pub struct DiskCollector {
    disks: Disks,
}

impl DiskCollector {
    pub fn new() -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
        }
    }
}

impl Default for DiskCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for DiskCollector {
    fn name(&self) -> &str {
        "disk"
    }

    fn collect(&mut self) -> Result<Vec<MetricSample>> {
        self.disks.refresh();
        let mut samples = Vec::new();

        for disk in self.disks.iter() {
            let mount = disk.mount_point().to_string_lossy();
            let total = disk.total_space();
            let available = disk.available_space();
            let used = total.saturating_sub(available);

            samples.push(MetricSample::gauge(format!("DiskTotal:{mount}"), total as f64));
            samples.push(MetricSample::gauge(format!("DiskUsed:{mount}"), used as f64));
            samples.push(MetricSample::gauge(format!("DiskAvailable:{mount}"), available as f64));
        }

        Ok(samples)
    }
}
