//! Memory backend with snapshots on disk.
//!
//! The whole aggregate is written as one JSON [`PersistedEvent`] per flush.
//! Flushes go to a temporary file in the target directory which is then
//! renamed over the snapshot, so readers see either the previous or the new
//! snapshot. With a zero store interval every mutation flushes immediately;
//! otherwise a background task flushes on each interval tick. Either way one
//! last flush runs when the shutdown token fires.

use crate::memory::MemoryStore;
use crate::{AggregateStore, Result, StorageError};
use async_trait::async_trait;
use metron_common::retry::{retry_handle, Backoff, Failure, RetryError};
use metron_common::types::MetricSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// On-disk form of a full snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEvent {
    #[serde(default)]
    pub gauges: HashMap<String, f64>,
    #[serde(default)]
    pub counters: HashMap<String, i64>,
    /// Unix seconds at which the snapshot was taken.
    pub timestamp: i64,
}

impl PersistedEvent {
    /// Non-finite gauges have no JSON form and are left out.
    pub fn capture(set: MetricSet) -> Self {
        let mut gauges = set.gauges;
        gauges.retain(|name, value| {
            let keep = value.is_finite();
            if !keep {
                tracing::warn!(name = %name, value = %value, "Skipping non-finite gauge in snapshot");
            }
            keep
        });
        Self {
            gauges,
            counters: set.counters,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn into_set(self) -> MetricSet {
        MetricSet {
            gauges: self.gauges,
            counters: self.counters,
        }
    }
}

/// Source of the snapshot restored at start-up.
#[async_trait]
pub trait SnapshotReader: Send {
    async fn open(&mut self) -> Result<()>;

    /// `None` when there is nothing to restore.
    async fn read_event(&mut self) -> Result<Option<PersistedEvent>>;

    async fn close(&mut self) -> Result<()>;
}

/// Destination of each flush. `close` commits what `write_event` wrote.
#[async_trait]
pub trait SnapshotWriter: Send {
    async fn open(&mut self) -> Result<()>;

    async fn write_event(&mut self, event: &PersistedEvent) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

fn open_error(e: RetryError<io::Error>) -> StorageError {
    match e.into_inner() {
        Some(io) => StorageError::Io(io),
        None => StorageError::Cancelled,
    }
}

fn not_open(path: &Path) -> StorageError {
    StorageError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("{} is not open", path.display()),
    ))
}

/// Reads a [`PersistedEvent`] from a JSON file. A missing or empty file
/// yields no event. Opening retries while the file is not yet readable.
pub struct JsonFileReader {
    path: PathBuf,
    backoff: Backoff,
    cancel: CancellationToken,
    contents: Option<Vec<u8>>,
}

impl JsonFileReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backoff: Backoff::default(),
            cancel: CancellationToken::new(),
            contents: None,
        }
    }

    pub fn with_retry(mut self, backoff: Backoff, cancel: CancellationToken) -> Self {
        self.backoff = backoff;
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl SnapshotReader for JsonFileReader {
    async fn open(&mut self) -> Result<()> {
        let path = &self.path;
        let bytes = retry_handle(&self.backoff, &self.cancel, || async move {
            match tokio::fs::read(path).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Err(Failure::Retryable(e)),
                Err(e) => Err(Failure::Permanent(e)),
            }
        })
        .await
        .map_err(open_error)?;
        self.contents = Some(bytes);
        Ok(())
    }

    async fn read_event(&mut self) -> Result<Option<PersistedEvent>> {
        let bytes = self.contents.as_deref().ok_or_else(|| not_open(&self.path))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(bytes)?))
    }

    async fn close(&mut self) -> Result<()> {
        self.contents = None;
        Ok(())
    }
}

/// Writes each [`PersistedEvent`] to a temporary file next to the target and
/// renames it into place on `close`. A failed write leaves the previous
/// snapshot untouched.
pub struct JsonFileWriter {
    path: PathBuf,
    backoff: Backoff,
    cancel: CancellationToken,
    pending: Option<NamedTempFile>,
    written: bool,
}

impl JsonFileWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backoff: Backoff::default(),
            cancel: CancellationToken::new(),
            pending: None,
            written: false,
        }
    }

    pub fn with_retry(mut self, backoff: Backoff, cancel: CancellationToken) -> Self {
        self.backoff = backoff;
        self.cancel = cancel;
        self
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }
}

#[async_trait]
impl SnapshotWriter for JsonFileWriter {
    async fn open(&mut self) -> Result<()> {
        let dir = self.dir();
        std::fs::create_dir_all(dir)?;
        let temp = retry_handle(&self.backoff, &self.cancel, || async move {
            NamedTempFile::new_in(dir).map_err(|e| {
                if e.kind() == io::ErrorKind::PermissionDenied {
                    Failure::Retryable(e)
                } else {
                    Failure::Permanent(e)
                }
            })
        })
        .await
        .map_err(open_error)?;
        self.pending = Some(temp);
        self.written = false;
        Ok(())
    }

    async fn write_event(&mut self, event: &PersistedEvent) -> Result<()> {
        let temp = self.pending.as_mut().ok_or_else(|| not_open(&self.path))?;
        let mut out = io::BufWriter::new(temp.as_file_mut());
        serde_json::to_writer(&mut out, event)?;
        out.flush()?;
        drop(out);
        temp.as_file().sync_all()?;
        self.written = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(temp) = self.pending.take() else {
            return Ok(());
        };
        if std::mem::take(&mut self.written) {
            temp.persist(&self.path).map_err(|e| StorageError::Io(e.error))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FileStoreConfig {
    /// Zero flushes after every mutation.
    pub store_interval: Duration,
    /// Seed the aggregate from the snapshot file during `init`.
    pub restore: bool,
}

struct Inner {
    memory: MemoryStore,
    // Serializes flushes against each other only; mutations go through the
    // snapshot's own lock.
    writer: tokio::sync::Mutex<Box<dyn SnapshotWriter>>,
    store_interval: Duration,
}

impl Inner {
    /// Only a failure to open the writer is returned; later failures are
    /// logged and leave the previous snapshot in place.
    async fn flush(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let event = PersistedEvent::capture(self.memory.snapshot().copy());
        writer.open().await?;

        let written = writer.write_event(&event).await;
        let closed = writer.close().await;
        match written.and(closed) {
            Ok(()) => tracing::debug!(
                gauges = event.gauges.len(),
                counters = event.counters.len(),
                "Snapshot flushed"
            ),
            Err(e) => tracing::error!(error = %e, "Snapshot flush failed"),
        }
        Ok(())
    }
}

async fn run_flusher(inner: Arc<Inner>, stop: CancellationToken) {
    if inner.store_interval.is_zero() {
        stop.cancelled().await;
    } else {
        let period = inner.store_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = inner.flush().await {
                        tracing::error!(error = %e, "Periodic snapshot flush failed");
                    }
                }
            }
        }
    }

    match inner.flush().await {
        Ok(()) => tracing::info!("Final snapshot flush complete"),
        Err(e) => tracing::error!(error = %e, "Final snapshot flush failed"),
    }
}

pub struct FileStore {
    inner: Arc<Inner>,
    restore: bool,
    reader: tokio::sync::Mutex<Box<dyn SnapshotReader>>,
    flusher: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl FileStore {
    pub fn new(
        config: FileStoreConfig,
        reader: Box<dyn SnapshotReader>,
        writer: Box<dyn SnapshotWriter>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                memory: MemoryStore::new(),
                writer: tokio::sync::Mutex::new(writer),
                store_interval: config.store_interval,
            }),
            restore: config.restore,
            reader: tokio::sync::Mutex::new(reader),
            flusher: Mutex::new(None),
        }
    }

    /// A store snapshotting to the JSON file at `path`. File opens are
    /// retried on the default schedule until `abort` fires.
    pub fn json(path: impl AsRef<Path>, config: FileStoreConfig, abort: CancellationToken) -> Self {
        let path = path.as_ref();
        Self::new(
            config,
            Box::new(JsonFileReader::new(path).with_retry(Backoff::default(), abort.clone())),
            Box::new(JsonFileWriter::new(path).with_retry(Backoff::default(), abort)),
        )
    }

    fn write_through(&self) -> bool {
        self.inner.store_interval.is_zero()
    }

    fn lock_flusher(&self) -> MutexGuard<'_, Option<(CancellationToken, JoinHandle<()>)>> {
        self.flusher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn restore_snapshot(&self) -> Result<()> {
        let mut reader = self.reader.lock().await;
        reader.open().await?;
        let event = reader.read_event().await;
        reader.close().await?;

        match event? {
            Some(event) => {
                let set = event.into_set();
                tracing::info!(
                    gauges = set.gauges.len(),
                    counters = set.counters.len(),
                    "Restored metrics snapshot"
                );
                self.inner.memory.snapshot().replace(set);
            }
            None => tracing::info!("No metrics snapshot to restore"),
        }
        Ok(())
    }

    /// Flushes the current aggregate now.
    pub async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

#[async_trait]
impl AggregateStore for FileStore {
    async fn init(&self, shutdown: CancellationToken) -> Result<()> {
        if self.restore {
            self.restore_snapshot().await?;
        }

        let mut flusher = self.lock_flusher();
        if flusher.is_none() {
            let stop = shutdown.child_token();
            let handle = tokio::spawn(run_flusher(self.inner.clone(), stop.clone()));
            *flusher = Some((stop, handle));
            tracing::info!(
                interval_secs = self.inner.store_interval.as_secs(),
                write_through = self.write_through(),
                "File store started"
            );
        }
        Ok(())
    }

    async fn set_gauge(&self, key: &str, value: f64) -> Result<()> {
        self.inner.memory.set_gauge(key, value).await?;
        if self.write_through() {
            self.inner.flush().await?;
        }
        Ok(())
    }

    async fn add_counter(&self, key: &str, delta: i64) -> Result<()> {
        self.inner.memory.add_counter(key, delta).await?;
        if self.write_through() {
            self.inner.flush().await?;
        }
        Ok(())
    }

    async fn get_gauge(&self, key: &str) -> Result<f64> {
        self.inner.memory.get_gauge(key).await
    }

    async fn get_counter(&self, key: &str) -> Result<i64> {
        self.inner.memory.get_counter(key).await
    }

    async fn get_metrics(&self) -> Result<MetricSet> {
        self.inner.memory.get_metrics().await
    }

    async fn set_metrics(&self, batch: &MetricSet) -> Result<()> {
        self.inner.memory.set_metrics(batch).await?;
        if self.write_through() {
            self.inner.flush().await?;
        }
        Ok(())
    }

    /// Stops the flusher and waits for its final flush.
    async fn close(&self) -> Result<()> {
        let flusher = self.lock_flusher().take();
        if let Some((stop, handle)) = flusher {
            stop.cancel();
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Snapshot flusher task failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn reader_treats_missing_and_empty_files_as_nothing_to_restore() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.json");

        let mut reader = JsonFileReader::new(&path);
        reader.open().await.unwrap();
        assert_eq!(reader.read_event().await.unwrap(), None);
        reader.close().await.unwrap();

        std::fs::write(&path, "  \n").unwrap();
        reader.open().await.unwrap();
        assert_eq!(reader.read_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_rejects_malformed_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.json");
        std::fs::write(&path, "{not json").unwrap();

        let mut reader = JsonFileReader::new(&path);
        reader.open().await.unwrap();
        assert!(matches!(reader.read_event().await, Err(StorageError::Json(_))));
    }

    #[tokio::test]
    async fn writer_replaces_previous_snapshot_on_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("metrics.json");
        let mut writer = JsonFileWriter::new(&path);

        let mut set = MetricSet::default();
        set.counters.insert("requests".into(), 1);
        writer.open().await.unwrap();
        writer.write_event(&PersistedEvent::capture(set.clone())).await.unwrap();
        writer.close().await.unwrap();

        set.counters.insert("requests".into(), 2);
        writer.open().await.unwrap();
        writer.write_event(&PersistedEvent::capture(set)).await.unwrap();
        writer.close().await.unwrap();

        let event: PersistedEvent = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(event.counters["requests"], 2);
        assert!(event.timestamp > 0);
    }

    #[tokio::test]
    async fn writer_without_write_keeps_old_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.json");
        std::fs::write(&path, "old").unwrap();

        let mut writer = JsonFileWriter::new(&path);
        writer.open().await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old");
    }
}
