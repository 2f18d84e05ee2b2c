use crate::Collector;
use anyhow::Result;
use metron_common::types::MetricSample;
use std::collections::HashMap;
use sysinfo::Networks;

/// Traffic per interface, reported as counters.
///
/// Each collection emits the bytes moved since the previous collection, so
/// the server-side sum tracks the interface totals from the agent's start.
/// The first collection only records the baseline.
pub struct NetworkCollector {
    networks: Networks,
    prev_received: HashMap<String, u64>,
    prev_transmitted: HashMap<String, u64>,
}

impl NetworkCollector {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
            prev_received: HashMap::new(),
            prev_transmitted: HashMap::new(),
        }
    }
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn delta(prev: &mut HashMap<String, u64>, name: &str, current: u64) -> Option<i64> {
    let previous = prev.insert(name.to_string(), current)?;
    i64::try_from(current.saturating_sub(previous)).ok()
}

impl Collector for NetworkCollector {
    fn name(&self) -> &str {
        "network"
    }

    fn collect(&mut self) -> Result<Vec<MetricSample>> {
        self.networks.refresh();
        let mut samples = Vec::new();

        for (name, data) in self.networks.iter() {
            if let Some(rx) = delta(&mut self.prev_received, name, data.total_received()) {
                samples.push(MetricSample::counter(format!("NetworkBytesRecv:{name}"), rx));
            }
            if let Some(tx) = delta(&mut self.prev_transmitted, name, data.total_transmitted()) {
                samples.push(MetricSample::counter(format!("NetworkBytesSent:{name}"), tx));
            }
        }

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reading_is_only_a_baseline() {
        let mut prev = HashMap::new();
        assert_eq!(delta(&mut prev, "eth0", 100), None);
        assert_eq!(delta(&mut prev, "eth0", 160), Some(60));
        // Counter reset on the interface.
        assert_eq!(delta(&mut prev, "eth0", 10), Some(0));
    }
}
