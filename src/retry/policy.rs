//! Per-category retry policies.
//!
//! Transient categories (network, timeout, system) get more attempts and
//! longer delays. Deterministic failures (syntax, permission) are not
//! retryable: re-running without a code change cannot fix them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::Category;

/// Static backoff policy for one category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter_fraction: f64,
    #[serde(default = "retryable_default")]
    pub retryable: bool,
}

fn retryable_default() -> bool {
    true
}

impl RetryPolicy {
    pub const fn new(
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter_fraction: f64,
    ) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            jitter_fraction,
            retryable: true,
        }
    }

    /// Single-attempt policy that never retries.
    pub const fn never() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_fraction: 0.0,
            retryable: false,
        }
    }

    /// `min(base * 2^attempt, max)` without jitter; saturates instead of overflowing.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Reason this policy is unusable, if any.
    pub fn problem(&self) -> Option<String> {
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Some(format!("jitter_fraction {} must be within 0..=1", self.jitter_fraction));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Some(format!(
                "base_delay_ms {} exceeds max_delay_ms {}",
                self.base_delay_ms, self.max_delay_ms
            ));
        }
        None
    }
}

/// Built-in policy for `category`.
pub fn default_policy(category: Category) -> RetryPolicy {
    match category {
        Category::Syntax | Category::Permission => RetryPolicy::never(),
        Category::Dependency => RetryPolicy::new(3, 2_000, 30_000, 0.1),
        Category::Configuration => RetryPolicy::new(2, 1_000, 10_000, 0.1),
        Category::Network => RetryPolicy::new(5, 2_000, 30_000, 0.25),
        Category::Timeout => RetryPolicy::new(5, 5_000, 120_000, 0.25),
        Category::System => RetryPolicy::new(5, 5_000, 180_000, 0.25),
        Category::Runtime => RetryPolicy::new(3, 2_000, 45_000, 0.1),
        Category::Unknown => RetryPolicy::new(3, 1_000, 30_000, 0.1),
    }
}

/// Policy per category, built once and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    policies: BTreeMap<Category, RetryPolicy>,
}

impl PolicyTable {
    /// Defaults with whole-policy overrides for the listed categories.
    pub fn with_overrides(overrides: &BTreeMap<Category, RetryPolicy>) -> Self {
        let policies = Category::ALL
            .iter()
            .map(|c| (*c, overrides.get(c).copied().unwrap_or_else(|| default_policy(*c))))
            .collect();
        Self { policies }
    }

    pub fn get(&self, category: Category) -> RetryPolicy {
        self.policies
            .get(&category)
            .copied()
            .unwrap_or_else(|| default_policy(category))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Category, &RetryPolicy)> {
        self.policies.iter()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::with_overrides(&BTreeMap::new())
    }
}
