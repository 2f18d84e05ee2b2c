use crate::ingest::Ingestor;
use chrono::{DateTime, Utc};
use metron_storage::AggregateStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub backend: &'static str,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(store: Arc<dyn AggregateStore>, backend: &'static str) -> Self {
        Self {
            ingestor: Arc::new(Ingestor::new(store)),
            backend,
            start_time: Utc::now(),
        }
    }
}
