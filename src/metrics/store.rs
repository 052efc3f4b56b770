//! SQLite persistence for per-run metric aggregates.
//!
//! One row per (run_id, name). Upserts merge into an existing row, so several
//! processes reporting for the same run never duplicate it.

use rusqlite::{Connection, Row, params};
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::{MetricKind, MetricRow};
use crate::error::{FixloopError, Result};

pub struct MetricsStore {
    db: Connection,
}

impl MetricsStore {
    /// Open or create `<dir>/metrics.db`.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let db = Connection::open(dir.join("metrics.db"))?;
        db.busy_timeout(Duration::from_secs(5))?;
        Self::init_schema(&db)?;
        Ok(Self { db })
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                run_id TEXT NOT NULL,
                workflow_id TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                value REAL NOT NULL,
                count INTEGER NOT NULL,
                min REAL NOT NULL,
                max REAL NOT NULL,
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (run_id, name)
            );

            CREATE INDEX IF NOT EXISTS idx_metrics_name_time ON metrics(name, recorded_at);
            CREATE INDEX IF NOT EXISTS idx_metrics_workflow ON metrics(workflow_id);
            "#,
        )?;
        Ok(())
    }

    /// Insert or merge one aggregate row.
    ///
    /// Timers and counters add up, gauges keep the newest value.
    pub fn upsert(&self, row: &MetricRow) -> Result<()> {
        self.db.execute(
            r#"
            INSERT INTO metrics
                (run_id, workflow_id, name, kind, value, count, min, max, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(run_id, name) DO UPDATE SET
                value = CASE WHEN excluded.kind = 'gauge'
                    THEN excluded.value
                    ELSE metrics.value + excluded.value END,
                count = metrics.count + excluded.count,
                min = MIN(metrics.min, excluded.min),
                max = MAX(metrics.max, excluded.max),
                kind = excluded.kind,
                recorded_at = excluded.recorded_at
            "#,
            params![
                row.run_id,
                row.workflow_id,
                row.name,
                row.kind.as_str(),
                row.value,
                row.count as i64,
                row.min,
                row.max,
                row.recorded_at,
            ],
        )?;
        Ok(())
    }

    /// Rows recorded at or after `since_ms`, oldest first, optionally for one metric.
    pub fn query(&self, name: Option<&str>, since_ms: i64) -> Result<Vec<MetricRow>> {
        let mut stmt = self.db.prepare(
            r#"
            SELECT run_id, workflow_id, name, kind, value, count, min, max, recorded_at
            FROM metrics
            WHERE recorded_at >= ?1 AND (?2 IS NULL OR name = ?2)
            ORDER BY recorded_at ASC, run_id ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![since_ms, name], Self::row_to_metric)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_metric(row: &Row<'_>) -> rusqlite::Result<MetricRow> {
        let kind: String = row.get(3)?;
        let count: i64 = row.get(5)?;
        Ok(MetricRow {
            run_id: row.get(0)?,
            workflow_id: row.get(1)?,
            name: row.get(2)?,
            kind: kind.parse().unwrap_or(MetricKind::Gauge),
            value: row.get(4)?,
            count: count.max(0) as u64,
            min: row.get(6)?,
            max: row.get(7)?,
            recorded_at: row.get(8)?,
        })
    }

    /// Delete rows recorded before `cutoff_ms`.
    pub fn delete_older_than(&self, cutoff_ms: i64) -> Result<usize> {
        let removed = self
            .db
            .execute("DELETE FROM metrics WHERE recorded_at < ?1", params![cutoff_ms])?;
        Ok(removed)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM metrics", [], |row| row.get(0))
            .map_err(|e| FixloopError::Storage(e.to_string()))?;
        Ok(n as usize)
    }
}
