use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Seconds between snapshot flushes; 0 writes through on every update.
    #[serde(default = "default_store_interval")]
    pub store_interval_secs: u64,
    /// Snapshot file for the file backend. Unset or empty selects the
    /// in-memory backend unless `database_dsn` is set.
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: Option<String>,
    #[serde(default = "default_restore")]
    pub restore: bool,
    /// SQLite database path; takes precedence over the file backend.
    #[serde(default)]
    pub database_dsn: Option<String>,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_listen_addr() -> String {
    "localhost:8080".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_file_storage_path() -> Option<String> {
    Some("/tmp/metrics-db.json".to_string())
}

fn default_restore() -> bool {
    true
}

fn default_shutdown_grace() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            store_interval_secs: default_store_interval(),
            file_storage_path: default_file_storage_path(),
            restore: default_restore(),
            database_dsn: None,
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    /// Reads `path` if it exists, then applies environment overrides.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).with_context(|| format!("Invalid server config {path}"))?
        } else {
            tracing::info!(path, "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overrides fields from `ADDRESS`, `STORE_INTERVAL`,
    /// `FILE_STORAGE_PATH`, `RESTORE` and `DATABASE_DSN`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(address) = lookup("ADDRESS") {
            self.listen_addr = address;
        }
        if let Some(v) = lookup("STORE_INTERVAL") {
            self.store_interval_secs = v.trim().parse().with_context(|| format!("STORE_INTERVAL={v}"))?;
        }
        if let Some(v) = lookup("FILE_STORAGE_PATH") {
            self.file_storage_path = Some(v);
        }
        if let Some(v) = lookup("RESTORE") {
            self.restore = v.trim().parse().with_context(|| format!("RESTORE={v}"))?;
        }
        if let Some(v) = lookup("DATABASE_DSN") {
            self.database_dsn = Some(v);
        }
        self.file_storage_path = non_empty(self.file_storage_path.take());
        self.database_dsn = non_empty(self.database_dsn.take());
        Ok(())
    }

    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
