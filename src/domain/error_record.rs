//! ErrorRecord and its lifecycle
//!
//! `NEW -> CLASSIFIED -> RETRYING -> {RESOLVED | EXHAUSTED}`.
//! A classified error that is never retried may go straight to EXHAUSTED.
//! RESOLVED is only reachable from RETRYING and is signaled by the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::category::{Category, Severity};
use super::task::TaskMeta;
use crate::error::{FixloopError, Result};
use crate::id::{generate_record_id, now_ms};

/// Lifecycle state of an observed failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorState {
    New,
    Classified,
    Retrying,
    Resolved,
    Exhausted,
}

impl ErrorState {
    /// Returns true once no further transitions are allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, ErrorState::Resolved | ErrorState::Exhausted)
    }

    /// Whether `self -> next` is a legal edge.
    pub fn can_transition_to(&self, next: ErrorState) -> bool {
        use ErrorState::*;
        matches!(
            (self, next),
            (New, Classified)
                | (Classified, Retrying)
                | (Classified, Exhausted)
                | (Retrying, Retrying)
                | (Retrying, Resolved)
                | (Retrying, Exhausted)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorState::New => "new",
            ErrorState::Classified => "classified",
            ErrorState::Retrying => "retrying",
            ErrorState::Resolved => "resolved",
            ErrorState::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for ErrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observed failure, tracked until resolved or exhausted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,

    /// Error text as the task emitted it
    pub raw_text: String,

    /// Classification cache key
    pub normalized_hash: String,

    /// Recurrence signature used by feedback analysis
    pub signature: String,

    /// Where the error came from ("build", "test", ...)
    pub source_hint: Option<String>,

    pub category: Option<Category>,
    pub severity: Option<Severity>,

    /// Retries started so far
    pub attempt_count: u32,

    pub state: ErrorState,

    /// Why the record was exhausted (stop reason or cancellation)
    pub exhausted_reason: Option<String>,

    pub meta: TaskMeta,

    pub created_at: i64,
    pub updated_at: i64,
}

impl ErrorRecord {
    /// Create a record in the NEW state.
    pub fn new(raw_text: &str, source_hint: Option<&str>, meta: TaskMeta) -> Self {
        let now = now_ms();
        Self {
            id: generate_record_id(),
            raw_text: raw_text.to_string(),
            normalized_hash: crate::classify::normalized_hash(raw_text),
            signature: crate::classify::signature(raw_text),
            source_hint: source_hint.map(String::from),
            category: None,
            severity: None,
            attempt_count: 0,
            state: ErrorState::New,
            exhausted_reason: None,
            meta,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: ErrorState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(FixloopError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        log::debug!("ErrorRecord {}: {} -> {}", self.id, self.state, next);
        self.state = next;
        self.updated_at = now_ms();
        Ok(())
    }

    /// NEW -> CLASSIFIED
    pub fn mark_classified(&mut self, category: Category, severity: Severity) -> Result<()> {
        self.transition(ErrorState::Classified)?;
        self.category = Some(category);
        self.severity = Some(severity);
        Ok(())
    }

    /// CLASSIFIED|RETRYING -> RETRYING, counting the new attempt
    pub fn begin_retry(&mut self) -> Result<()> {
        self.transition(ErrorState::Retrying)?;
        self.attempt_count += 1;
        Ok(())
    }

    /// RETRYING -> RESOLVED
    pub fn resolve(&mut self) -> Result<()> {
        self.transition(ErrorState::Resolved)
    }

    /// CLASSIFIED|RETRYING -> EXHAUSTED
    pub fn exhaust(&mut self, reason: &str) -> Result<()> {
        self.transition(ErrorState::Exhausted)?;
        self.exhausted_reason = Some(reason.to_string());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ErrorRecord {
        ErrorRecord::new("ConnectionError: connection refused", Some("test"), TaskMeta::default())
    }

    #[test]
    fn test_new_record() {
        let r = record();
        assert_eq!(r.state, ErrorState::New);
        assert_eq!(r.attempt_count, 0);
        assert!(r.category.is_none());
        assert_eq!(r.source_hint.as_deref(), Some("test"));
        assert_eq!(r.normalized_hash.len(), 64);
        assert!(r.id.starts_with("err-"));
    }

    #[test]
    fn test_happy_path_to_resolved() {
        let mut r = record();
        r.mark_classified(Category::Network, Severity::Medium).unwrap();
        r.begin_retry().unwrap();
        r.begin_retry().unwrap();
        assert_eq!(r.attempt_count, 2);
        r.resolve().unwrap();
        assert!(r.is_terminal());
        assert_eq!(r.state, ErrorState::Resolved);
    }

    #[test]
    fn test_exhaust_from_classified() {
        let mut r = record();
        r.mark_classified(Category::Syntax, Severity::Low).unwrap();
        r.exhaust("not_retryable").unwrap();
        assert_eq!(r.state, ErrorState::Exhausted);
        assert_eq!(r.exhausted_reason.as_deref(), Some("not_retryable"));
    }

    #[test]
    fn test_resolve_requires_retrying() {
        let mut r = record();
        r.mark_classified(Category::Network, Severity::Medium).unwrap();
        let err = r.resolve().unwrap_err();
        assert!(matches!(err, FixloopError::InvalidTransition { .. }));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut r = record();
        r.mark_classified(Category::Network, Severity::Medium).unwrap();
        r.begin_retry().unwrap();
        r.exhaust("cancelled").unwrap();
        assert!(r.begin_retry().is_err());
        assert!(r.resolve().is_err());
        assert!(r.exhaust("again").is_err());
        assert_eq!(r.attempt_count, 1);
    }

    #[test]
    fn test_cannot_skip_classification() {
        let mut r = record();
        assert!(r.begin_retry().is_err());
        assert!(r.exhaust("x").is_err());
        assert_eq!(r.state, ErrorState::New);
    }
}
