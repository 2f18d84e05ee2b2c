use crate::config::ServerConfig;
use metron_common::retry::Backoff;
use metron_storage::file::{FileStore, FileStoreConfig};
use metron_storage::memory::MemoryStore;
use metron_storage::relational::RelationalStore;
use metron_storage::AggregateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Storage backend chosen from configuration: a database DSN wins over a
/// snapshot file, and with neither the aggregate lives only in memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Relational { dsn: String },
    File { path: String, store_interval: Duration, restore: bool },
    Memory,
}

impl Backend {
    pub fn select(config: &ServerConfig) -> Self {
        if let Some(dsn) = &config.database_dsn {
            return Backend::Relational { dsn: dsn.clone() };
        }
        if let Some(path) = &config.file_storage_path {
            return Backend::File {
                path: path.clone(),
                store_interval: config.store_interval(),
                restore: config.restore,
            };
        }
        Backend::Memory
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Relational { .. } => "relational",
            Backend::File { .. } => "file",
            Backend::Memory => "memory",
        }
    }

    /// Builds the store. Retries inside it give up once `abort` fires.
    pub fn open(&self, abort: CancellationToken) -> anyhow::Result<Arc<dyn AggregateStore>> {
        let store: Arc<dyn AggregateStore> = match self {
            Backend::Relational { dsn } => Arc::new(RelationalStore::sqlite(dsn, Backoff::default(), abort)?),
            Backend::File {
                path,
                store_interval,
                restore,
            } => Arc::new(FileStore::json(
                path,
                FileStoreConfig {
                    store_interval: *store_interval,
                    restore: *restore,
                },
                abort,
            )),
            Backend::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }
}
