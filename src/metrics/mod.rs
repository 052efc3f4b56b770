//! MetricsTracker: per-run timers, gauges and counters.
//!
//! `start` hands out a `RunHandle`; samples accumulate in memory and `stop`
//! aggregates them into one row per metric name and persists the rows to
//! `<root>/metrics/metrics.db`.

pub mod analyzer;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::cache::CacheObserver;
use crate::config::MetricsConfig;
use crate::error::{FixloopError, Result};
use crate::id::now_ms;
pub use analyzer::{Anomaly, MetricStats, MetricsAnalyzer, MetricsReport, Trend};
pub use store::MetricsStore;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Milliseconds; aggregates to the total.
    Timer,
    /// Point-in-time value; aggregates to the last one.
    Gauge,
    /// Aggregates to the sum.
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Timer => "timer",
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = FixloopError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "timer" => Ok(MetricKind::Timer),
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(FixloopError::InvalidInput(format!("unknown metric kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
}

/// Aggregate for one metric in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub run_id: String,
    pub workflow_id: String,
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub recorded_at: i64,
}

struct RunState {
    workflow_id: String,
    run_id: String,
    started: Instant,
    samples: Mutex<Vec<Sample>>,
}

/// Cheap-to-clone handle for the metrics of one run.
#[derive(Clone)]
pub struct RunHandle {
    state: Arc<RunState>,
}

impl RunHandle {
    fn new(workflow_id: &str, run_id: &str) -> Self {
        Self {
            state: Arc::new(RunState {
                workflow_id: workflow_id.to_string(),
                run_id: run_id.to_string(),
                started: Instant::now(),
                samples: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.state.workflow_id
    }

    pub fn run_id(&self) -> &str {
        &self.state.run_id
    }

    fn samples_mut(&self) -> MutexGuard<'_, Vec<Sample>> {
        self.state.samples.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn push(&self, name: &str, kind: MetricKind, value: f64) {
        self.samples_mut().push(Sample {
            name: name.to_string(),
            kind,
            value,
        });
    }

    /// Scoped timer; records elapsed milliseconds when dropped.
    pub fn timer(&self, name: &str) -> TimerGuard {
        TimerGuard {
            handle: self.clone(),
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    pub fn record_duration(&self, name: &str, elapsed: Duration) {
        self.push(name, MetricKind::Timer, elapsed.as_secs_f64() * 1000.0);
    }

    pub fn gauge(&self, name: &str, value: f64) {
        self.push(name, MetricKind::Gauge, value);
    }

    pub fn increment(&self, name: &str, by: f64) {
        self.push(name, MetricKind::Counter, by);
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples_mut().clone()
    }

    /// One row per metric name, ordered by name.
    pub fn aggregate(&self) -> Vec<MetricRow> {
        let recorded_at = now_ms();
        let mut grouped: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
        for s in self.samples() {
            grouped.entry(s.name.clone()).or_default().push(s);
        }

        grouped
            .into_iter()
            .filter_map(|(name, samples)| {
                let last = samples.last()?;
                let kind = last.kind;
                let value = match kind {
                    MetricKind::Gauge => last.value,
                    MetricKind::Timer | MetricKind::Counter => {
                        samples.iter().map(|s| s.value).sum()
                    }
                };
                Some(MetricRow {
                    run_id: self.run_id().to_string(),
                    workflow_id: self.workflow_id().to_string(),
                    name,
                    kind,
                    value,
                    count: samples.len() as u64,
                    min: samples.iter().map(|s| s.value).fold(f64::INFINITY, f64::min),
                    max: samples.iter().map(|s| s.value).fold(f64::NEG_INFINITY, f64::max),
                    recorded_at,
                })
            })
            .collect()
    }
}

impl CacheObserver for RunHandle {
    fn on_hit(&self, namespace: &str) {
        self.increment(&format!("cache.{}.hits", namespace), 1.0);
    }

    fn on_miss(&self, namespace: &str) {
        self.increment(&format!("cache.{}.misses", namespace), 1.0);
    }
}

/// Records its lifetime as a timer sample on drop.
pub struct TimerGuard {
    handle: RunHandle,
    name: String,
    start: Instant,
}

impl TimerGuard {
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.handle.record_duration(&self.name, self.start.elapsed());
    }
}

pub struct MetricsTracker {
    store: Option<Mutex<MetricsStore>>,
    analyzer: MetricsAnalyzer,
}

impl MetricsTracker {
    /// Tracker persisting under `dir`. An unusable store is logged and metrics
    /// are then kept in memory only.
    pub fn open(dir: &Path, config: &MetricsConfig) -> Self {
        let store = match MetricsStore::open(dir) {
            Ok(store) => Some(Mutex::new(store)),
            Err(e) => {
                log::warn!("Metrics store {} unavailable: {}", dir.display(), e);
                None
            }
        };
        Self {
            store,
            analyzer: MetricsAnalyzer::new(
                config.window_days,
                config.anomaly_k,
                config.min_samples,
            ),
        }
    }

    /// Tracker that never persists.
    pub fn in_memory(config: &MetricsConfig) -> Self {
        Self {
            store: None,
            analyzer: MetricsAnalyzer::new(
                config.window_days,
                config.anomaly_k,
                config.min_samples,
            ),
        }
    }

    pub fn start(&self, workflow_id: &str, run_id: &str) -> RunHandle {
        log::debug!("Metrics started for workflow {} run {}", workflow_id, run_id);
        RunHandle::new(workflow_id, run_id)
    }

    /// Aggregate and persist the run. Returns the rows written.
    pub fn stop(&self, handle: RunHandle) -> Result<Vec<MetricRow>> {
        handle.record_duration("run.total_ms", handle.state.started.elapsed());
        let rows = handle.aggregate();

        if let Some(store) = &self.store {
            let store = store.lock().map_err(|e| FixloopError::Storage(e.to_string()))?;
            for row in &rows {
                store.upsert(row)?;
            }
        }

        log::info!("Recorded {} metrics for run {}", rows.len(), handle.run_id());
        Ok(rows)
    }

    /// Rows in the trailing `days` window, oldest first.
    pub fn history(&self, days: u32) -> Result<Vec<MetricRow>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        let since = now_ms() - i64::from(days) * MS_PER_DAY;
        let store = store.lock().map_err(|e| FixloopError::Storage(e.to_string()))?;
        store.query(None, since)
    }

    /// Statistics, trends and anomalies over the trailing `days`.
    pub fn report(&self, days: u32) -> Result<MetricsReport> {
        let rows = self.history(days)?;
        let mut report = self.analyzer.analyze(&rows);
        report.window_days = days;
        Ok(report)
    }

    /// Delete rows older than `days`.
    pub fn cleanup_older_than(&self, days: u32) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let cutoff = now_ms() - i64::from(days) * MS_PER_DAY;
        let store = store.lock().map_err(|e| FixloopError::Storage(e.to_string()))?;
        store.delete_older_than(cutoff)
    }

    pub fn analyzer(&self) -> &MetricsAnalyzer {
        &self.analyzer
    }
}
