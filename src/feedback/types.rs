//! Feedback record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::Category;
use crate::error::{FixloopError, Result};
use crate::id::generate_feedback_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Error,
    Success,
    ReviewComment,
    Metric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    Ci,
    Tests,
    Review,
    User,
    AutomatedTests,
}

/// How the underlying failure ended, if it has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Resolved,
    Exhausted,
    #[default]
    Info,
}

macro_rules! str_enum {
    ($ty:ty, $what:literal, [$($variant:path => $name:literal),+ $(,)?]) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = FixloopError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_lowercase().replace('-', "_").as_str() {
                    $($name => Ok($variant),)+
                    other => Err(FixloopError::InvalidInput(format!(
                        "unknown {}: {}",
                        $what, other
                    ))),
                }
            }
        }
    };
}

str_enum!(FeedbackType, "feedback type", [
    FeedbackType::Error => "error",
    FeedbackType::Success => "success",
    FeedbackType::ReviewComment => "review_comment",
    FeedbackType::Metric => "metric",
]);

str_enum!(FeedbackSource, "feedback source", [
    FeedbackSource::Ci => "ci",
    FeedbackSource::Tests => "tests",
    FeedbackSource::Review => "review",
    FeedbackSource::User => "user",
    FeedbackSource::AutomatedTests => "automated_tests",
]);

str_enum!(Outcome, "outcome", [
    Outcome::Resolved => "resolved",
    Outcome::Exhausted => "exhausted",
    Outcome::Info => "info",
]);

/// One append-only feedback record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "type")]
    pub feedback_type: FeedbackType,
    pub source: FeedbackSource,
    /// 0.0 (trivial) to 1.0 (blocking)
    pub severity: f64,
    #[serde(default)]
    pub outcome: Outcome,
    #[serde(default)]
    pub category: Option<Category>,
    /// Recurrence signature of the message
    pub signature: String,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
}

impl FeedbackItem {
    /// New item with severity 0.5, outcome `info`, signature derived from the message.
    pub fn new(message: &str, feedback_type: FeedbackType, source: FeedbackSource) -> Self {
        Self {
            id: generate_feedback_id(),
            timestamp: Utc::now(),
            message: message.to_string(),
            feedback_type,
            source,
            severity: 0.5,
            outcome: Outcome::Info,
            category: None,
            signature: crate::classify::signature(message),
            attempts: 0,
            workflow_id: None,
            run_id: None,
        }
    }

    pub fn with_severity(mut self, severity: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&severity) {
            return Err(FixloopError::InvalidInput(format!(
                "severity {} must be within 0..=1",
                severity
            )));
        }
        self.severity = severity;
        Ok(self)
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_signature(mut self, signature: &str) -> Self {
        self.signature = signature.to_string();
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_run(mut self, workflow_id: &str, run_id: &str) -> Self {
        self.workflow_id = Some(workflow_id.to_string());
        self.run_id = Some(run_id.to_string());
        self
    }
}
