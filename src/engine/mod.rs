//! FixEngine: one task-run's view of the fix/retry loop.
//!
//! The engine owns a single shared `CacheManager` and hands it to the
//! classifier and context collector. It drives each failure through
//! `NEW -> CLASSIFIED -> RETRYING -> {RESOLVED | EXHAUSTED}` and appends a
//! feedback record whenever a failure reaches a terminal state.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheManager;
use crate::classify::{ClassificationResult, ErrorAnalysis, ErrorClassifier, extract_details};
use crate::config::Config;
use crate::context::{ContextBundle, ContextCollector, ContextRequest};
use crate::domain::{ErrorRecord, TaskMeta};
use crate::error::{FixloopError, Result};
use crate::feedback::{
    FeedbackAnalyzer, FeedbackItem, FeedbackSource, FeedbackStore, FeedbackType, Outcome,
};
use crate::metrics::{MetricRow, MetricsTracker, RunHandle};
use crate::report::Report;
use crate::retry::{RetryDecision, RetryManager, StopReason};

/// Longest error excerpt kept in a feedback message.
const FEEDBACK_MESSAGE_CHARS: usize = 500;

/// A failure being worked on, with the classification that drives its decisions.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedFailure {
    pub record: ErrorRecord,
    pub classification: ClassificationResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub cache_entries: usize,
    pub metric_rows: usize,
}

pub struct FixEngine {
    config: Config,
    meta: TaskMeta,
    cache: Arc<CacheManager>,
    classifier: ErrorClassifier,
    retry: RetryManager,
    context: ContextCollector,
    metrics: MetricsTracker,
    run: RunHandle,
    feedback: FeedbackStore,
    analyzer: FeedbackAnalyzer,
}

impl FixEngine {
    /// Wire every component under `config.cache.root` and start metrics for `meta`.
    pub fn from_config(config: &Config, meta: TaskMeta) -> Result<Self> {
        let root: PathBuf = config.cache.root.clone();
        let cache = Arc::new(CacheManager::open(&root));

        let classifier = ErrorClassifier::from_config(
            &config.classifier,
            cache.clone(),
            config.cache.error_ttl(),
        )?;
        let retry = RetryManager::from_config(&config.retry);
        let context = ContextCollector::new(
            config.context.clone(),
            cache.clone(),
            config.cache.context_ttl(),
        );
        let metrics = MetricsTracker::open(&root.join("metrics"), &config.metrics);
        let feedback = FeedbackStore::open(&root.join("feedback"));

        let run = metrics.start(&meta.workflow_id, &meta.run_id);
        cache.set_observer(Some(Arc::new(run.clone())));

        log::info!(
            "Engine ready for workflow {} run {} (cache root {})",
            meta.workflow_id,
            meta.run_id,
            root.display()
        );

        Ok(Self {
            config: config.clone(),
            meta,
            cache,
            classifier,
            retry,
            context,
            metrics,
            run,
            feedback,
            analyzer: FeedbackAnalyzer::new(config.feedback.recurrence_threshold),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn retry(&self) -> &RetryManager {
        &self.retry
    }

    pub fn run(&self) -> &RunHandle {
        &self.run
    }

    pub fn feedback(&self) -> &FeedbackStore {
        &self.feedback
    }

    /// Timed classification.
    pub fn classify(&self, text: &str, source_hint: Option<&str>) -> ClassificationResult {
        let _timer = self.run.timer("classify.duration_ms");
        self.classifier.classify_with_hint(text, source_hint)
    }

    pub fn analyze(&self, text: &str) -> ErrorAnalysis {
        let _timer = self.run.timer("classify.duration_ms");
        self.classifier.analyze(text)
    }

    pub fn analyze_all(&self, output: &str) -> Vec<ErrorAnalysis> {
        let _timer = self.run.timer("classify.duration_ms");
        self.classifier.analyze_all(output)
    }

    /// Stateless decision for `category` at `attempt`, as exposed to collaborators.
    pub fn decide_retry(&self, category: crate::domain::Category, attempt: u32) -> RetryDecision {
        self.retry.decide(category, attempt)
    }

    /// Record a new failure and classify it (NEW -> CLASSIFIED).
    pub fn observe_failure(
        &self,
        raw_text: &str,
        source_hint: Option<&str>,
    ) -> Result<TrackedFailure> {
        let mut record = ErrorRecord::new(raw_text, source_hint, self.meta.clone());
        let classification = self.classify(raw_text, source_hint);
        record.mark_classified(classification.category, classification.severity)?;
        self.run.increment("failures.observed", 1.0);

        log::info!(
            "Failure {} classified as {} / {}",
            record.id,
            classification.category,
            classification.severity
        );
        Ok(TrackedFailure {
            record,
            classification,
        })
    }

    /// Decide the next step for `failure` and apply the matching transition.
    ///
    /// A retry moves the record to RETRYING and counts the attempt. A stop
    /// moves it to EXHAUSTED and appends an exhausted feedback record.
    pub fn decide(&self, failure: &mut TrackedFailure) -> Result<RetryDecision> {
        let classification = &failure.classification;
        let mut decision = self
            .retry
            .decide(classification.category, failure.record.attempt_count);

        // Pattern-level advice only applies when a pattern actually matched.
        if decision.retry
            && classification.matched_pattern.is_some()
            && !classification.retry_recommended
        {
            decision.retry = false;
            decision.delay_ms = 0;
            decision.stop_reason = Some(StopReason::NotRecommended);
        }

        match decision.stop_reason {
            None => {
                failure.record.begin_retry()?;
                self.run.increment("retries.scheduled", 1.0);
            }
            Some(reason) => {
                failure.record.exhaust(reason.as_str())?;
                self.run.increment("failures.exhausted", 1.0);
                tracing::warn!(
                    record = %failure.record.id,
                    category = %classification.category,
                    attempts = failure.record.attempt_count,
                    reason = %reason,
                    "retries exhausted"
                );
                self.append_terminal(&failure.record, Outcome::Exhausted);
            }
        }
        Ok(decision)
    }

    /// Wait out the decision's delay. Cancellation exhausts the failure.
    pub async fn backoff(
        &self,
        failure: &mut TrackedFailure,
        decision: &RetryDecision,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _timer = self.run.timer("retry.backoff_ms");
        match self.retry.wait(Duration::from_millis(decision.delay_ms), cancel).await {
            Err(err @ FixloopError::Cancelled { .. }) => {
                self.cancel(failure)?;
                Err(err)
            }
            other => other,
        }
    }

    /// The hosting job was cancelled or timed out: exhaust with a cancellation reason.
    pub fn cancel(&self, failure: &mut TrackedFailure) -> Result<()> {
        failure.record.exhaust(StopReason::Cancelled.as_str())?;
        self.run.increment("failures.cancelled", 1.0);
        tracing::warn!(
            record = %failure.record.id,
            attempts = failure.record.attempt_count,
            "failure cancelled"
        );
        self.append_terminal(&failure.record, Outcome::Exhausted);
        Ok(())
    }

    /// The retried attempt failed again with `output`: reclassify and decide.
    pub fn attempt_failed(
        &self,
        failure: &mut TrackedFailure,
        output: &str,
    ) -> Result<RetryDecision> {
        self.run.increment("attempts.failed", 1.0);
        let fresh = self.classify(output, failure.record.source_hint.as_deref());
        if !fresh.is_unknown() && fresh.category != failure.classification.category {
            log::info!(
                "Failure {} changed from {} to {}",
                failure.record.id,
                failure.classification.category,
                fresh.category
            );
            failure.record.category = Some(fresh.category);
            failure.record.severity = Some(fresh.severity);
            failure.classification = fresh;
        }
        self.decide(failure)
    }

    /// The retried attempt succeeded (RETRYING -> RESOLVED).
    pub fn resolve(&self, failure: &mut TrackedFailure) -> Result<()> {
        failure.record.resolve()?;
        self.run.increment("failures.resolved", 1.0);
        log::info!(
            "Failure {} resolved after {} attempts",
            failure.record.id,
            failure.record.attempt_count
        );
        self.append_terminal(&failure.record, Outcome::Resolved);
        Ok(())
    }

    /// Context request for the project root with configured limits.
    pub fn context_request(&self, keywords: Vec<String>) -> ContextRequest {
        let cfg = self.context.config();
        ContextRequest::new(self.meta.project_root.clone(), cfg.max_items, cfg.max_tokens)
            .with_keywords(keywords)
    }

    /// Keywords describing a failure: its category and the stem of any file it names.
    pub fn failure_keywords(failure: &TrackedFailure) -> Vec<String> {
        let mut keywords = vec![failure.classification.category.to_string()];
        let details = extract_details(&failure.record.raw_text);
        if let Some(path) = details.file_path {
            if let Some(stem) = std::path::Path::new(&path).file_stem().and_then(|s| s.to_str()) {
                keywords.push(stem.to_string());
            }
        }
        keywords
    }

    pub fn build_context(&self, request: &ContextRequest) -> ContextBundle {
        let _timer = self.run.timer("context.build_ms");
        let bundle = self.context.build(request);
        self.run.gauge("context.tokens", bundle.total_tokens as f64);
        self.run.gauge("context.items", bundle.items.len() as f64);
        bundle
    }

    /// Append a caller-supplied feedback record, tagged with this run when untagged.
    pub fn record_feedback(&self, mut item: FeedbackItem) -> Result<()> {
        if item.run_id.is_none() {
            item = item.with_run(&self.meta.workflow_id, &self.meta.run_id);
        }
        self.feedback.append(&item)
    }

    fn append_terminal(&self, record: &ErrorRecord, outcome: Outcome) {
        let source = match record.source_hint.as_deref() {
            Some("test") | Some("tests") => FeedbackSource::Tests,
            _ => FeedbackSource::Ci,
        };
        let mut item = FeedbackItem::new(&excerpt(&record.raw_text), FeedbackType::Error, source)
            .with_outcome(outcome)
            .with_signature(&record.signature)
            .with_attempts(record.attempt_count)
            .with_run(&record.meta.workflow_id, &record.meta.run_id);
        item.severity = record.severity.map(|s| s.weight()).unwrap_or(0.5);
        if let Some(category) = record.category {
            item = item.with_category(category);
        }

        if let Err(e) = self.feedback.append(&item) {
            log::warn!("Failed to append feedback for {}: {}", record.id, e);
        }
    }

    /// Metrics and feedback over the trailing `days`.
    pub fn report(&self, days: u32) -> Result<Report> {
        let metrics = self.metrics.report(days)?;
        let now = Utc::now();
        let items = self.feedback.read_since(now - ChronoDuration::days(i64::from(days)))?;
        let feedback = self.analyzer.analyze(&items, days, now);
        Ok(Report::new(days, metrics, feedback))
    }

    /// Drop expired cache entries and metrics older than the metrics window.
    pub fn cleanup(&self) -> Result<CleanupSummary> {
        let cache_entries = self.cache.cleanup();
        let metric_rows = self.metrics.cleanup_older_than(self.config.metrics.window_days)?;
        log::info!(
            "Cleanup removed {} cache entries and {} metric rows",
            cache_entries,
            metric_rows
        );
        Ok(CleanupSummary {
            cache_entries,
            metric_rows,
        })
    }

    /// Stop metrics for the run and persist them.
    pub fn finish(self) -> Result<Vec<MetricRow>> {
        self.cache.set_observer(None);
        self.metrics.stop(self.run)
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(FEEDBACK_MESSAGE_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
