//! Classification output types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::extract::ErrorDetails;
use crate::domain::{Category, Severity};

/// Outcome of classifying one error text. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub severity: Severity,
    pub retry_recommended: bool,
    pub confidence: f64,
    pub typical_fix_seconds: Option<u64>,
    pub matched_pattern: Option<String>,
}

impl ClassificationResult {
    /// Result for text no pattern matched.
    pub fn unknown() -> Self {
        Self {
            category: Category::Unknown,
            severity: Severity::Low,
            retry_recommended: false,
            confidence: 0.0,
            typical_fix_seconds: None,
            matched_pattern: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.category == Category::Unknown
    }
}

/// Classification plus details pulled from the raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub message: String,
    #[serde(flatten)]
    pub classification: ClassificationResult,
    #[serde(flatten)]
    pub details: ErrorDetails,
    pub suggested_fix: String,
}

/// Roll-up over every message in a multi-error output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_category: BTreeMap<Category, usize>,
    pub affected_files: Vec<String>,
    pub estimated_fix_seconds: u64,
    pub retry_recommended: bool,
    pub highest_severity: Option<Severity>,
}

impl ErrorSummary {
    pub fn from_analyses(analyses: &[ErrorAnalysis]) -> Self {
        let mut summary = Self {
            total: analyses.len(),
            ..Default::default()
        };
        let mut files = BTreeSet::new();

        for a in analyses {
            let c = &a.classification;
            *summary.by_severity.entry(c.severity).or_insert(0) += 1;
            *summary.by_category.entry(c.category).or_insert(0) += 1;
            summary.estimated_fix_seconds += c.typical_fix_seconds.unwrap_or(0);
            summary.retry_recommended |= c.retry_recommended;
            summary.highest_severity = summary.highest_severity.max(Some(c.severity));
            if let Some(path) = &a.details.file_path {
                files.insert(path.clone());
            }
        }

        summary.affected_files = files.into_iter().collect();
        summary
    }
}
