//! Rolling-window statistics, trend and anomaly detection over per-run metrics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::MetricRow;

/// Relative slope (per run, as a fraction of the mean) below which a series is stable.
const STABLE_SLOPE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub name: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub latest: f64,
    pub slope: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub name: String,
    pub run_id: String,
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub z_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub window_days: u32,
    pub runs: usize,
    pub metrics: Vec<MetricStats>,
    pub anomalies: Vec<Anomaly>,
}

pub struct MetricsAnalyzer {
    pub window_days: u32,
    pub k: f64,
    pub min_samples: usize,
}

impl MetricsAnalyzer {
    pub fn new(window_days: u32, k: f64, min_samples: usize) -> Self {
        Self {
            window_days,
            k,
            min_samples,
        }
    }

    /// Analyze rows already restricted to the window, oldest first.
    pub fn analyze(&self, rows: &[MetricRow]) -> MetricsReport {
        let mut series: BTreeMap<&str, Vec<&MetricRow>> = BTreeMap::new();
        for row in rows {
            series.entry(row.name.as_str()).or_default().push(row);
        }

        let mut runs: Vec<&str> = rows.iter().map(|r| r.run_id.as_str()).collect();
        runs.sort();
        runs.dedup();

        let mut report = MetricsReport {
            window_days: self.window_days,
            runs: runs.len(),
            ..Default::default()
        };

        for (name, points) in series {
            let values: Vec<f64> = points.iter().map(|r| r.value).collect();
            report.metrics.push(stats(name, &values));

            if let Some(anomaly) = self.check_latest(name, &points) {
                tracing::warn!(
                    metric = %anomaly.name,
                    run_id = %anomaly.run_id,
                    value = anomaly.value,
                    z_score = anomaly.z_score,
                    "metric anomaly"
                );
                report.anomalies.push(anomaly);
            }
        }

        report
    }

    /// Latest value vs the mean of the preceding values.
    fn check_latest(&self, name: &str, points: &[&MetricRow]) -> Option<Anomaly> {
        let (latest, preceding) = points.split_last()?;
        if preceding.len() < self.min_samples.max(2) {
            return None;
        }
        let values: Vec<f64> = preceding.iter().map(|r| r.value).collect();
        let mean = mean(&values);
        let std_dev = std_dev(&values, mean);
        if std_dev <= 0.0 {
            return None;
        }
        let z_score = (latest.value - mean).abs() / std_dev;
        (z_score > self.k).then(|| Anomaly {
            name: name.to_string(),
            run_id: latest.run_id.clone(),
            value: latest.value,
            mean,
            std_dev,
            z_score,
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Sample standard deviation.
fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Least-squares slope of `values` against their index.
fn slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);
    let (num, den) = values.iter().enumerate().fold((0.0, 0.0), |(num, den), (i, y)| {
        let dx = i as f64 - x_mean;
        (num + dx * (y - y_mean), den + dx * dx)
    });
    if den == 0.0 { 0.0 } else { num / den }
}

pub fn stats(name: &str, values: &[f64]) -> MetricStats {
    let m = mean(values);
    let s = slope(values);
    let trend = if values.len() < 2 {
        Trend::InsufficientData
    } else {
        let relative = s / m.abs().max(f64::EPSILON);
        if relative.abs() < STABLE_SLOPE {
            Trend::Stable
        } else if s > 0.0 {
            Trend::Increasing
        } else {
            Trend::Decreasing
        }
    };

    MetricStats {
        name: name.to_string(),
        count: values.len(),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean: m,
        median: median(values),
        std_dev: std_dev(values, m),
        latest: values.last().copied().unwrap_or(0.0),
        slope: s,
        trend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricKind;

    fn rows(name: &str, values: &[f64]) -> Vec<MetricRow> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricRow {
                run_id: format!("run-{}", i),
                workflow_id: "ci".to_string(),
                name: name.to_string(),
                kind: MetricKind::Timer,
                value: *v,
                count: 1,
                min: *v,
                max: *v,
                recorded_at: i as i64,
            })
            .collect()
    }

    #[test]
    fn test_basic_stats() {
        let s = stats("x", &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(s.count, 4);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 4.0);
        assert_eq!(s.mean, 2.5);
        assert_eq!(s.median, 2.5);
        assert_eq!(s.latest, 4.0);
        assert!((s.slope - 1.0).abs() < 1e-9);
        assert_eq!(s.trend, Trend::Increasing);
    }

    #[test]
    fn test_trend_classes() {
        assert_eq!(stats("x", &[5.0]).trend, Trend::InsufficientData);
        assert_eq!(stats("x", &[100.0, 100.0, 100.0]).trend, Trend::Stable);
        assert_eq!(stats("x", &[9.0, 6.0, 3.0]).trend, Trend::Decreasing);
    }

    #[test]
    fn test_anomaly_detected() {
        let analyzer = MetricsAnalyzer::new(30, 2.0, 5);
        let data = rows("classify_ms", &[10.0, 11.0, 9.0, 10.0, 10.0, 11.0, 50.0]);
        let report = analyzer.analyze(&data);

        assert_eq!(report.runs, 7);
        assert_eq!(report.anomalies.len(), 1);
        let a = &report.anomalies[0];
        assert_eq!(a.run_id, "run-6");
        assert_eq!(a.value, 50.0);
        assert!(a.z_score > 2.0);
    }

    #[test]
    fn test_no_anomaly_within_band() {
        let analyzer = MetricsAnalyzer::new(30, 2.0, 5);
        let report = analyzer.analyze(&rows("x", &[10.0, 11.0, 9.0, 10.0, 10.0, 11.0, 10.5]));
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn test_anomaly_needs_min_samples() {
        let analyzer = MetricsAnalyzer::new(30, 2.0, 5);
        let report = analyzer.analyze(&rows("x", &[10.0, 11.0, 9.0, 500.0]));
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn test_flat_history_never_anomalous() {
        let analyzer = MetricsAnalyzer::new(30, 2.0, 3);
        let report = analyzer.analyze(&rows("x", &[10.0, 10.0, 10.0, 10.0, 99.0]));
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn test_groups_by_metric_name() {
        let mut data = rows("a", &[1.0, 2.0]);
        data.extend(rows("b", &[3.0]));
        let report = MetricsAnalyzer::new(7, 2.0, 5).analyze(&data);
        let names: Vec<&str> = report.metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(report.window_days, 7);
    }
}
