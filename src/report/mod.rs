//! Combined metrics and feedback report, rendered as JSON or Markdown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::error::Result;
use crate::feedback::FeedbackAnalysis;
use crate::metrics::{MetricsReport, Trend};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub window_days: u32,
    pub metrics: MetricsReport,
    pub feedback: FeedbackAnalysis,
}

fn trend_label(trend: Trend) -> &'static str {
    match trend {
        Trend::Increasing => "increasing",
        Trend::Decreasing => "decreasing",
        Trend::Stable => "stable",
        Trend::InsufficientData => "insufficient data",
    }
}

impl Report {
    pub fn new(window_days: u32, metrics: MetricsReport, feedback: FeedbackAnalysis) -> Self {
        Self {
            generated_at: Utc::now(),
            window_days,
            metrics,
            feedback,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = self.write_markdown(&mut out);
        out
    }

    fn write_markdown(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "# fixloop report")?;
        writeln!(out)?;
        writeln!(
            out,
            "Generated {} over the last {} days.",
            self.generated_at.format("%Y-%m-%d %H:%M UTC"),
            self.window_days
        )?;

        writeln!(out)?;
        writeln!(out, "## Recommendations")?;
        writeln!(out)?;
        if self.feedback.recommendations.is_empty() {
            writeln!(out, "No recurring failures detected.")?;
        }
        for rec in &self.feedback.recommendations {
            writeln!(out, "- **{:.2}** {}", rec.confidence, rec.text)?;
        }

        writeln!(out)?;
        writeln!(out, "## Insights")?;
        writeln!(out)?;
        for insight in &self.feedback.insights {
            writeln!(out, "- {}", insight)?;
        }
        if self.feedback.insights.is_empty() {
            writeln!(out, "- Nothing notable.")?;
        }

        writeln!(out)?;
        writeln!(out, "## Feedback")?;
        writeln!(out)?;
        writeln!(
            out,
            "{} records, average severity {:.2}, resolution rate {:.0}%.",
            self.feedback.total,
            self.feedback.average_severity,
            self.feedback.resolution_rate * 100.0
        )?;
        if !self.feedback.groups.is_empty() {
            writeln!(out)?;
            writeln!(out, "| Category | Source | Total | Resolved | Exhausted | Resolution |")?;
            writeln!(out, "|---|---|---:|---:|---:|---:|")?;
            for g in &self.feedback.groups {
                writeln!(
                    out,
                    "| {} | {} | {} | {} | {} | {:.0}% |",
                    g.category,
                    g.source,
                    g.total,
                    g.resolved,
                    g.exhausted,
                    g.resolution_rate * 100.0
                )?;
            }
        }

        writeln!(out)?;
        writeln!(out, "## Metrics")?;
        writeln!(out)?;
        writeln!(out, "{} runs recorded.", self.metrics.runs)?;
        if !self.metrics.metrics.is_empty() {
            writeln!(out)?;
            writeln!(out, "| Metric | Count | Mean | Median | Std dev | Latest | Trend |")?;
            writeln!(out, "|---|---:|---:|---:|---:|---:|---|")?;
            for m in &self.metrics.metrics {
                writeln!(
                    out,
                    "| {} | {} | {:.2} | {:.2} | {:.2} | {:.2} | {} |",
                    m.name,
                    m.count,
                    m.mean,
                    m.median,
                    m.std_dev,
                    m.latest,
                    trend_label(m.trend)
                )?;
            }
        }

        if !self.metrics.anomalies.is_empty() {
            writeln!(out)?;
            writeln!(out, "### Anomalies")?;
            writeln!(out)?;
            for a in &self.metrics.anomalies {
                writeln!(
                    out,
                    "- `{}` in run {}: {:.2} vs mean {:.2} (z = {:.1})",
                    a.name, a.run_id, a.value, a.mean, a.z_score
                )?;
            }
        }

        Ok(())
    }
}
