//! ErrorClassifier: raw error text -> category, severity, retry recommendation.
//!
//! Every pattern is evaluated against the normalized text and contributes its
//! longest match span. The longest span wins; equal spans fall back to
//! `Category::precedence`, then to table order. Results are cached in the
//! `errors` namespace keyed by the normalized hash, so a cache hit returns
//! exactly what evaluation would.

pub mod extract;
pub mod normalize;
pub mod patterns;
pub mod types;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::cache::{self, CacheManager};
use crate::config::ClassifierConfig;
use crate::error::Result;

pub use extract::{ErrorDetails, extract_details, split_messages};
pub use normalize::{normalize, normalized_hash, signature};
pub use patterns::{PatternSpec, PatternTable, default_patterns};
pub use types::{ClassificationResult, ErrorAnalysis, ErrorSummary};

/// Spans at or above this length earn full span credit.
const SPAN_SATURATION: usize = 30;

/// At most this many competing categories reduce confidence.
const MAX_COMPETITORS: usize = 3;

pub struct ErrorClassifier {
    table: PatternTable,
    cache: Arc<CacheManager>,
    ttl: Duration,
    evaluations: AtomicU64,
}

impl ErrorClassifier {
    pub fn new(table: PatternTable, cache: Arc<CacheManager>, ttl: Duration) -> Self {
        Self {
            table,
            cache,
            ttl,
            evaluations: AtomicU64::new(0),
        }
    }

    /// Build the pattern table from config and attach the shared cache.
    pub fn from_config(
        config: &ClassifierConfig,
        cache: Arc<CacheManager>,
        ttl: Duration,
    ) -> Result<Self> {
        let table = PatternTable::build(config.include_defaults, &config.patterns)?;
        log::debug!("Classifier loaded {} patterns", table.len());
        Ok(Self::new(table, cache, ttl))
    }

    /// Classify `text`, consulting the cache first.
    pub fn classify(&self, text: &str) -> ClassificationResult {
        let normalized = normalize(text);
        if normalized.is_empty() {
            log::warn!("Empty error text, classifying as unknown");
            return ClassificationResult::unknown();
        }

        let key = normalized_hash(text);
        if let Some(bytes) = self.cache.get(cache::ERRORS, &key) {
            match serde_json::from_slice::<ClassificationResult>(&bytes) {
                Ok(result) => {
                    log::debug!("Classification cache hit for {}", &key[..12]);
                    return result;
                }
                Err(e) => log::warn!(
                    "Discarding unreadable cached classification {}: {}",
                    &key[..12],
                    e
                ),
            }
        }

        let result = self.evaluate(&normalized);
        match serde_json::to_vec(&result) {
            Ok(bytes) => self.cache.put(cache::ERRORS, &key, &bytes, self.ttl),
            Err(e) => log::warn!("Failed to serialize classification: {}", e),
        }
        result
    }

    /// Classify with a source hint. The hint is logged only; it never changes the result.
    pub fn classify_with_hint(&self, text: &str, source: Option<&str>) -> ClassificationResult {
        let result = self.classify(text);
        log::info!(
            "Classified error from {} as {} ({}, confidence {:.3})",
            source.unwrap_or("unspecified source"),
            result.category,
            result.severity,
            result.confidence
        );
        result
    }

    /// Pattern evaluation over already-normalized text. Never consults the cache.
    pub fn evaluate(&self, normalized: &str) -> ClassificationResult {
        self.evaluations.fetch_add(1, Ordering::Relaxed);

        let mut best: Option<(usize, u8, usize)> = None;
        let mut matched = BTreeSet::new();

        for (idx, pattern) in self.table.patterns().iter().enumerate() {
            let Some(span) = pattern.longest_span(normalized) else {
                continue;
            };
            matched.insert(pattern.spec.category);

            let rank = pattern.spec.category.precedence();
            let better = match best {
                None => true,
                Some((best_span, best_rank, _)) => {
                    span > best_span || (span == best_span && rank < best_rank)
                }
            };
            if better {
                best = Some((span, rank, idx));
            }
        }

        let Some((span, _, idx)) = best else {
            return ClassificationResult::unknown();
        };

        let spec = &self.table.patterns()[idx].spec;
        let competitors = matched.iter().filter(|c| **c != spec.category).count();

        ClassificationResult {
            category: spec.category,
            severity: spec.severity,
            retry_recommended: spec.retryable,
            confidence: confidence(span, competitors),
            typical_fix_seconds: Some(spec.typical_fix_seconds),
            matched_pattern: Some(spec.regex.clone()),
        }
    }

    /// Classification plus extracted details and a suggested fix.
    pub fn analyze(&self, text: &str) -> ErrorAnalysis {
        let classification = self.classify(text);
        let suggested_fix = classification.category.suggested_fix().to_string();
        ErrorAnalysis {
            message: text.to_string(),
            details: extract_details(text),
            classification,
            suggested_fix,
        }
    }

    /// Split multi-error output and analyze each message.
    pub fn analyze_all(&self, output: &str) -> Vec<ErrorAnalysis> {
        split_messages(output).iter().map(|m| self.analyze(m)).collect()
    }

    /// How many times patterns have actually been evaluated.
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn table(&self) -> &PatternTable {
        &self.table
    }
}

fn confidence(span: usize, competitors: usize) -> f64 {
    let span_credit = 0.4 * span.min(SPAN_SATURATION) as f64 / SPAN_SATURATION as f64;
    let penalty = 0.1 * competitors.min(MAX_COMPETITORS) as f64;
    let raw = (0.5 + span_credit - penalty).clamp(0.1, 1.0);
    (raw * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, Severity};
    use quickcheck_macros::quickcheck;
    use tempfile::TempDir;

    fn classifier_with_cache() -> (TempDir, ErrorClassifier) {
        let temp_dir = TempDir::new().unwrap();
        let cache = Arc::new(CacheManager::open(temp_dir.path()));
        let classifier =
            ErrorClassifier::new(PatternTable::default(), cache, Duration::from_secs(86_400));
        (temp_dir, classifier)
    }

    fn uncached() -> ErrorClassifier {
        ErrorClassifier::new(
            PatternTable::default(),
            Arc::new(CacheManager::disabled()),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_dependency_error() {
        let r = uncached().classify("ModuleNotFoundError: No module named 'requests'");
        assert_eq!(r.category, Category::Dependency);
        assert_eq!(r.severity, Severity::Medium);
        assert!(r.retry_recommended);
        assert!(r.confidence > 0.5);
    }

    #[test]
    fn test_patterns_do_not_span_lines() {
        let c = uncached();
        let traceback = "Traceback (most recent call last):\n  \
                         File \"app/config.py\", line 3, in <module>\n    \
                         import requests\n\
                         ModuleNotFoundError: No module named 'requests'";
        let r = c.classify(traceback);
        assert_eq!(r.category, Category::Dependency);
        assert_eq!(r.severity, Severity::Medium);
        assert!(r.retry_recommended);

        let r = c.classify("Loading config\nModuleNotFoundError: No module named 'requests'");
        assert_eq!(r.category, Category::Dependency);
    }

    #[test]
    fn test_syntax_error() {
        let r = uncached().classify("SyntaxError: invalid syntax (line 42)");
        assert_eq!(r.category, Category::Syntax);
        assert_eq!(r.severity, Severity::Low);
        assert!(!r.retry_recommended);
        assert_eq!(r.typical_fix_seconds, Some(300));
    }

    #[test]
    fn test_unmatched_is_unknown() {
        let r = uncached().classify("everything is fine, nothing to see");
        assert_eq!(r, ClassificationResult::unknown());
        assert_eq!(r.confidence, 0.0);
        assert!(!r.retry_recommended);
        assert!(r.is_unknown());
    }

    #[test]
    fn test_empty_text_is_unknown() {
        let c = uncached();
        assert_eq!(c.classify("").category, Category::Unknown);
        assert_eq!(c.classify("  \n ").category, Category::Unknown);
        assert_eq!(c.evaluations(), 0);
    }

    #[test]
    fn test_longest_span_wins() {
        // "permission denied" (17) beats "timeout" (7)
        let r = uncached().classify("timeout while waiting: permission denied");
        assert_eq!(r.category, Category::Permission);
    }

    #[test]
    fn test_equal_span_uses_precedence() {
        let table = PatternTable::build(
            false,
            &[
                PatternSpec {
                    category: Category::System,
                    severity: Severity::Critical,
                    regex: "boom".to_string(),
                    retryable: true,
                    typical_fix_seconds: 10,
                },
                PatternSpec {
                    category: Category::Network,
                    severity: Severity::Medium,
                    regex: "boom".to_string(),
                    retryable: true,
                    typical_fix_seconds: 10,
                },
            ],
        )
        .unwrap();
        let cache = Arc::new(CacheManager::disabled());
        let c = ErrorClassifier::new(table, cache, Duration::from_secs(1));
        assert_eq!(c.classify("BOOM").category, Category::Network);
    }

    #[test]
    fn test_competitors_reduce_confidence() {
        let c = uncached();
        let alone = c.classify("connection refused by peer");
        let crowded = c.classify("connection refused by peer after timeout, permission denied");
        assert!(crowded.confidence < alone.confidence);
        assert!(crowded.confidence >= 0.1);
    }

    #[test]
    fn test_confidence_formula() {
        assert_eq!(confidence(30, 0), 0.9);
        assert_eq!(confidence(60, 0), 0.9);
        assert_eq!(confidence(15, 1), 0.6);
        assert_eq!(confidence(1, 3), 0.213);
        assert_eq!(confidence(0, 10), 0.2);
    }

    #[test]
    fn test_second_call_served_from_cache() {
        let (_temp, c) = classifier_with_cache();
        let text = "ModuleNotFoundError: No module named 'requests'";

        let first = c.classify(text);
        assert_eq!(c.evaluations(), 1);
        let second = c.classify(text);
        assert_eq!(c.evaluations(), 1);
        assert_eq!(first, second);

        let stats = c.cache.stats(cache::ERRORS);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_numbers_share_cache_entry() {
        let (_temp, c) = classifier_with_cache();
        c.classify("request timed out after 30s");
        c.classify("Request timed out after 45s");
        assert_eq!(c.evaluations(), 1);
    }

    #[test]
    fn test_hint_does_not_change_result() {
        let c = uncached();
        let text = "Error: connection refused";
        assert_eq!(
            c.classify_with_hint(text, Some("build")),
            c.classify_with_hint(text, Some("test"))
        );
        assert_eq!(c.classify_with_hint(text, None), c.classify(text));
    }

    #[test]
    fn test_analyze_extracts_details() {
        let raw = "  File \"app/db.py\", line 88\nPermissionError: [Errno 13] Permission denied";
        let a = uncached().analyze(raw);
        assert_eq!(a.classification.category, Category::Permission);
        assert_eq!(a.details.file_path.as_deref(), Some("app/db.py"));
        assert_eq!(a.details.line_number, Some(88));
        assert_eq!(a.suggested_fix, Category::Permission.suggested_fix());
    }

    #[test]
    fn test_analyze_all_and_summary() {
        let c = uncached();
        let output = "src/a.py:3: SyntaxError: invalid syntax\n\nConnection refused; weird thing";
        let analyses = c.analyze_all(output);
        assert_eq!(analyses.len(), 3);

        let summary = ErrorSummary::from_analyses(&analyses);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_category.get(&Category::Syntax), Some(&1));
        assert_eq!(summary.by_category.get(&Category::Network), Some(&1));
        assert_eq!(summary.by_category.get(&Category::Unknown), Some(&1));
        assert_eq!(summary.affected_files, vec!["src/a.py".to_string()]);
        assert_eq!(summary.estimated_fix_seconds, 360);
        assert!(summary.retry_recommended);
        assert_eq!(summary.highest_severity, Some(Severity::Medium));
    }

    #[quickcheck]
    fn prop_classification_is_deterministic(text: String) -> bool {
        let temp_dir = TempDir::new().unwrap();
        let cached = ErrorClassifier::new(
            PatternTable::default(),
            Arc::new(CacheManager::open(temp_dir.path())),
            Duration::from_secs(60),
        );
        let plain = uncached();

        let a = cached.classify(&text);
        let b = cached.classify(&text);
        let c = plain.classify(&text);
        a == b && b == c
    }
}
