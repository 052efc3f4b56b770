//! RetryManager: (category, attempt) -> retry decision and backoff delay.
//!
//! `delay = min(base * 2^attempt, max)` plus up to `jitter_fraction * delay`
//! of random jitter, clamped again to `max`. `retry` is true only while the
//! category is retryable and `attempt < max_attempts`.

pub mod policy;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::domain::Category;
use crate::error::{FixloopError, Result};
pub use policy::{PolicyTable, RetryPolicy, default_policy};

/// Why a decision said "stop".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    NotRetryable,
    AttemptsExhausted,
    NotRecommended,
    Cancelled,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::NotRetryable => "not_retryable",
            StopReason::AttemptsExhausted => "attempts_exhausted",
            StopReason::NotRecommended => "not_recommended",
            StopReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryDecision {
    pub category: Category,
    pub retry: bool,
    pub delay_ms: u64,
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

impl RetryDecision {
    /// Turn a stop decision into the terminal error the caller must act on.
    pub fn into_exhausted(self) -> Option<FixloopError> {
        let reason = self.stop_reason?;
        Some(FixloopError::RetryExhausted {
            category: self.category.to_string(),
            attempts: self.attempt,
            reason: reason.to_string(),
        })
    }
}

pub struct RetryManager {
    policies: PolicyTable,
    enable_jitter: bool,
}

impl RetryManager {
    pub fn new(policies: PolicyTable, enable_jitter: bool) -> Self {
        Self {
            policies,
            enable_jitter,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(PolicyTable::with_overrides(&config.policies), config.jitter)
    }

    pub fn policy(&self, category: Category) -> RetryPolicy {
        self.policies.get(category)
    }

    /// Decide whether attempt number `attempt` (0-based) should be retried.
    pub fn decide(&self, category: Category, attempt: u32) -> RetryDecision {
        let policy = self.policy(category);

        let stop_reason = if !policy.retryable {
            Some(StopReason::NotRetryable)
        } else if attempt >= policy.max_attempts {
            Some(StopReason::AttemptsExhausted)
        } else {
            None
        };

        let delay_ms = match stop_reason {
            None => self.delay_ms(&policy, attempt),
            Some(_) => 0,
        };

        tracing::debug!(
            category = %category,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms,
            retry = stop_reason.is_none(),
            "retry decision"
        );

        RetryDecision {
            category,
            retry: stop_reason.is_none(),
            delay_ms,
            attempt,
            max_attempts: policy.max_attempts,
            stop_reason,
        }
    }

    /// Backoff for `attempt` with jitter applied, never above `max_delay_ms`.
    pub fn delay_ms(&self, policy: &RetryPolicy, attempt: u32) -> u64 {
        let base = policy.backoff_ms(attempt);
        if !self.enable_jitter || policy.jitter_fraction <= 0.0 || base == 0 {
            return base;
        }
        let spread = policy.jitter_fraction * base as f64;
        let jitter = rand::rng().random_range(0.0..=spread);
        (base.saturating_add(jitter as u64)).min(policy.max_delay_ms)
    }

    /// Worst-case cumulative backoff for `category`, without jitter.
    pub fn max_total_wait(&self, category: Category) -> Duration {
        let policy = self.policy(category);
        if !policy.retryable {
            return Duration::ZERO;
        }
        let total = (0..policy.max_attempts)
            .fold(0u64, |acc, a| acc.saturating_add(policy.backoff_ms(a)));
        Duration::from_millis(total)
    }

    /// Sleep for `delay` unless `cancel` fires first.
    pub async fn wait(&self, delay: Duration, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::warn!(delay_ms = delay.as_millis() as u64, "backoff cancelled");
                Err(FixloopError::Cancelled {
                    reason: "backoff wait cancelled".to_string(),
                })
            }
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(PolicyTable::default(), true)
    }
}
