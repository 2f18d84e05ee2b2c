use crate::types::MetricSet;
use std::sync::{Mutex, MutexGuard};

/// In-memory aggregate of gauges (last write wins) and counters (running sum).
///
/// Every access goes through a single lock, so concurrent `set_gauge` /
/// `add_counter` calls are serialized and a batch [`Snapshot::apply`] is
/// observed as one unit by readers.
#[derive(Debug, Default)]
pub struct Snapshot {
    inner: Mutex<MetricSet>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricSet> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_gauge(&self, key: &str, value: f64) {
        self.lock().gauges.insert(key.to_string(), value);
    }

    /// Adds `delta` to the counter, creating it at `delta` when absent.
    /// Saturates at the `i64` bounds.
    pub fn add_counter(&self, key: &str, delta: i64) {
        let mut set = self.lock();
        let slot = set.counters.entry(key.to_string()).or_insert(0);
        *slot = slot.saturating_add(delta);
    }

    pub fn gauge(&self, key: &str) -> Option<f64> {
        self.lock().gauges.get(key).copied()
    }

    pub fn counter(&self, key: &str) -> Option<i64> {
        self.lock().counters.get(key).copied()
    }

    /// Returns an independent copy of the current state.
    pub fn copy(&self) -> MetricSet {
        self.lock().clone()
    }

    /// Applies a batch under one lock acquisition: gauges overwrite, counters add.
    pub fn apply(&self, batch: &MetricSet) {
        let mut set = self.lock();
        for (key, value) in &batch.gauges {
            set.gauges.insert(key.clone(), *value);
        }
        for (key, delta) in &batch.counters {
            let slot = set.counters.entry(key.clone()).or_insert(0);
            *slot = slot.saturating_add(*delta);
        }
    }

    /// Replaces the whole state, e.g. when restoring from disk.
    pub fn replace(&self, set: MetricSet) {
        *self.lock() = set;
    }

    /// Takes the current state and leaves the snapshot empty.
    pub fn drain(&self) -> MetricSet {
        std::mem::take(&mut *self.lock())
    }

    /// Puts an undelivered batch back. Counters are re-added; a gauge is only
    /// restored when no newer value was recorded since the drain.
    pub fn merge_back(&self, batch: MetricSet) {
        let mut set = self.lock();
        for (key, value) in batch.gauges {
            set.gauges.entry(key).or_insert(value);
        }
        for (key, delta) in batch.counters {
            let slot = set.counters.entry(key).or_insert(0);
            *slot = slot.saturating_add(delta);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn gauge_overwrites_and_counter_accumulates() {
        let snap = Snapshot::new();
        snap.set_gauge("Alloc", 1.0);
        snap.set_gauge("Alloc", 2.5);
        for d in [1, 2, 3, 4] {
            snap.add_counter("PollCount", d);
        }
        assert_eq!(snap.gauge("Alloc"), Some(2.5));
        assert_eq!(snap.counter("PollCount"), Some(10));
        assert_eq!(snap.gauge("missing"), None);
    }

    #[test]
    fn copy_is_detached() {
        let snap = Snapshot::new();
        snap.set_gauge("a", 1.0);
        let mut copy = snap.copy();
        copy.gauges.insert("a".into(), 99.0);
        assert_eq!(snap.gauge("a"), Some(1.0));
    }

    #[test]
    fn drain_then_merge_back() {
        let snap = Snapshot::new();
        snap.set_gauge("Alloc", 1.0);
        snap.add_counter("PollCount", 3);

        let drained = snap.drain();
        assert!(snap.is_empty());

        snap.set_gauge("Alloc", 5.0);
        snap.add_counter("PollCount", 1);
        snap.merge_back(drained);

        assert_eq!(snap.gauge("Alloc"), Some(5.0));
        assert_eq!(snap.counter("PollCount"), Some(4));
    }

    #[test]
    fn counter_saturates() {
        let snap = Snapshot::new();
        snap.add_counter("big", i64::MAX);
        snap.add_counter("big", 1);
        assert_eq!(snap.counter("big"), Some(i64::MAX));
    }

    #[test]
    fn concurrent_adds_are_not_lost() {
        let snap = Arc::new(Snapshot::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let snap = snap.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        snap.add_counter("hits", 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(snap.counter("hits"), Some(8000));
    }
}
