use crate::sql::{RetryingExecutor, SqlError, SqlExecutor, SqlTransaction, SqlValue};
use crate::sqlite::SqliteExecutor;
use crate::{AggregateStore, Result, StorageError};
use async_trait::async_trait;
use metron_common::retry::Backoff;
use metron_common::types::{MetricKind, MetricSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CREATE_GAUGE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS gauge (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    value REAL
)";

const CREATE_COUNTER_TABLE: &str = "
CREATE TABLE IF NOT EXISTS counter (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    value INTEGER
)";

const GAUGE_UPSERT: &str = "ON CONFLICT (name) DO UPDATE SET value = excluded.value";
/// Saturates at the `i64` bounds; SQLite would otherwise overflow into a REAL.
const COUNTER_UPSERT: &str = "ON CONFLICT (name) DO UPDATE SET value = CASE \
     WHEN excluded.value > 0 AND counter.value > 9223372036854775807 - excluded.value \
     THEN 9223372036854775807 \
     WHEN excluded.value < 0 AND counter.value < (-9223372036854775807 - 1) - excluded.value \
     THEN (-9223372036854775807 - 1) \
     ELSE counter.value + excluded.value END";

/// Rows per multi-row upsert; two bound parameters each.
pub const UPSERT_CHUNK_ROWS: usize = 400;

fn upsert_sql(table: &str, rows: usize, conflict: &str) -> String {
    let placeholders: Vec<String> = (0..rows)
        .map(|i| format!("(?{}, ?{})", 2 * i + 1, 2 * i + 2))
        .collect();
    format!(
        "INSERT INTO {table} (name, value) VALUES {} {conflict}",
        placeholders.join(", ")
    )
}

async fn upsert_chunks(
    tx: &mut dyn SqlTransaction,
    table: &str,
    conflict: &str,
    rows: &[(&String, SqlValue)],
) -> std::result::Result<(), SqlError> {
    for chunk in rows.chunks(UPSERT_CHUNK_ROWS) {
        let params: Vec<SqlValue> = chunk
            .iter()
            .flat_map(|(name, value)| [SqlValue::Text((*name).clone()), value.clone()])
            .collect();
        tx.exec(&upsert_sql(table, chunk.len(), conflict), &params).await?;
    }
    Ok(())
}

/// Counters first, then gauges, in key order.
async fn apply_batch(tx: &mut dyn SqlTransaction, batch: &MetricSet) -> std::result::Result<(), SqlError> {
    let mut counters: Vec<_> = batch
        .counters
        .iter()
        .map(|(name, delta)| (name, SqlValue::Integer(*delta)))
        .collect();
    counters.sort_by(|a, b| a.0.cmp(b.0));
    upsert_chunks(tx, "counter", COUNTER_UPSERT, &counters).await?;

    let mut gauges: Vec<_> = batch
        .gauges
        .iter()
        .map(|(name, value)| (name, SqlValue::Real(*value)))
        .collect();
    gauges.sort_by(|a, b| a.0.cmp(b.0));
    upsert_chunks(tx, "gauge", GAUGE_UPSERT, &gauges).await
}

/// Backend storing gauges and counters in two relational tables.
///
/// Nothing is cached in process; every call round-trips to the database.
pub struct RelationalStore {
    db: Arc<dyn SqlExecutor>,
}

impl RelationalStore {
    pub fn new(db: Arc<dyn SqlExecutor>) -> Self {
        Self { db }
    }

    /// Opens a SQLite database for `dsn` (a path, optionally prefixed with
    /// `sqlite://`, or `:memory:`). Connection-class failures are retried on
    /// `backoff` until `abort` fires.
    pub fn sqlite(dsn: &str, backoff: Backoff, abort: CancellationToken) -> Result<Self> {
        let path = dsn.strip_prefix("sqlite://").unwrap_or(dsn);
        let executor = if path == ":memory:" {
            SqliteExecutor::open_in_memory()?
        } else {
            SqliteExecutor::open(path)?
        };
        Ok(Self::new(Arc::new(RetryingExecutor::new(executor, backoff, abort))))
    }

    async fn get_value(&self, kind: MetricKind, key: &str) -> Result<SqlValue> {
        let table = match kind {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        };
        let row = self
            .db
            .query_row(
                &format!("SELECT value FROM {table} WHERE name = ?1"),
                &[SqlValue::from(key)],
            )
            .await?;
        row.and_then(|row| row.into_iter().next())
            .ok_or_else(|| StorageError::NotFound {
                kind,
                key: key.to_string(),
            })
    }
}

fn not_valid(kind: MetricKind, key: &str) -> StorageError {
    StorageError::NotValid {
        kind,
        key: key.to_string(),
    }
}

#[async_trait]
impl AggregateStore for RelationalStore {
    async fn init(&self, _shutdown: CancellationToken) -> Result<()> {
        self.db.exec(CREATE_GAUGE_TABLE, &[]).await?;
        self.db.exec(CREATE_COUNTER_TABLE, &[]).await?;
        tracing::info!("Relational store schema ready");
        Ok(())
    }

    async fn set_gauge(&self, key: &str, value: f64) -> Result<()> {
        self.db
            .exec(
                &format!("INSERT INTO gauge (name, value) VALUES (?1, ?2) {GAUGE_UPSERT}"),
                &[key.into(), value.into()],
            )
            .await?;
        Ok(())
    }

    async fn add_counter(&self, key: &str, delta: i64) -> Result<()> {
        self.db
            .exec(
                &format!("INSERT INTO counter (name, value) VALUES (?1, ?2) {COUNTER_UPSERT}"),
                &[key.into(), delta.into()],
            )
            .await?;
        Ok(())
    }

    async fn get_gauge(&self, key: &str) -> Result<f64> {
        self.get_value(MetricKind::Gauge, key)
            .await?
            .as_f64()
            .ok_or_else(|| not_valid(MetricKind::Gauge, key))
    }

    async fn get_counter(&self, key: &str) -> Result<i64> {
        self.get_value(MetricKind::Counter, key)
            .await?
            .as_i64()
            .ok_or_else(|| not_valid(MetricKind::Counter, key))
    }

    async fn get_metrics(&self) -> Result<MetricSet> {
        let mut set = MetricSet::default();

        for row in self.db.query("SELECT name, value FROM gauge", &[]).await? {
            match (row.first().and_then(SqlValue::as_str), row.get(1).and_then(SqlValue::as_f64)) {
                (Some(name), Some(value)) => {
                    set.gauges.insert(name.to_string(), value);
                }
                (name, _) => tracing::warn!(name = ?name, "Skipping gauge row without a value"),
            }
        }
        for row in self.db.query("SELECT name, value FROM counter", &[]).await? {
            match (row.first().and_then(SqlValue::as_str), row.get(1).and_then(SqlValue::as_i64)) {
                (Some(name), Some(value)) => {
                    set.counters.insert(name.to_string(), value);
                }
                (name, _) => tracing::warn!(name = ?name, "Skipping counter row without a value"),
            }
        }
        Ok(set)
    }

    /// Applies the batch in one transaction; any failing statement rolls
    /// the whole batch back.
    async fn set_metrics(&self, batch: &MetricSet) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.db.begin().await?;
        let applied = apply_batch(tx.as_mut(), batch).await;
        match applied {
            Ok(()) => {
                tx.commit().await?;
                tracing::debug!(
                    gauges = batch.gauges.len(),
                    counters = batch.counters.len(),
                    "Batch committed"
                );
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(error = %rollback, "Rollback failed");
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counter_upsert_saturates_in_sql() {
        let db = SqliteExecutor::open_in_memory().unwrap();
        db.exec(CREATE_COUNTER_TABLE, &[]).await.unwrap();
        let add = |delta: i64| {
            let db = db.clone();
            async move {
                db.exec(&upsert_sql("counter", 1, COUNTER_UPSERT), &["c".into(), delta.into()])
                    .await
                    .unwrap();
                db.query_row("SELECT value FROM counter WHERE name = 'c'", &[])
                    .await
                    .unwrap()
                    .unwrap()[0]
                    .clone()
            }
        };

        assert_eq!(add(i64::MAX).await, SqlValue::Integer(i64::MAX));
        assert_eq!(add(1).await, SqlValue::Integer(i64::MAX));
        assert_eq!(add(i64::MIN).await, SqlValue::Integer(-1));
        assert_eq!(add(i64::MIN).await, SqlValue::Integer(i64::MIN));
    }

    #[test]
    fn upsert_sql_numbers_placeholders_per_row() {
        assert_eq!(
            upsert_sql("gauge", 2, GAUGE_UPSERT),
            "INSERT INTO gauge (name, value) VALUES (?1, ?2), (?3, ?4) \
             ON CONFLICT (name) DO UPDATE SET value = excluded.value"
        );
    }
}
