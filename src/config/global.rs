//! Configuration for fixloop.
//!
//! Loaded from an explicit path, `.fixloop.yml`, or `~/.config/fixloop/fixloop.yml`.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::PatternSpec;
use crate::domain::Category;
use crate::retry::RetryPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Default log level when RUST_LOG is unset.
    pub log_level: Option<String>,

    pub cache: CacheConfig,
    pub classifier: ClassifierConfig,
    pub retry: RetryConfig,
    pub context: ContextConfig,
    pub metrics: MetricsConfig,
    pub feedback: FeedbackConfig,
}

impl Config {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .fixloop.yml in current directory
    /// 3. ~/.config/fixloop/fixloop.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(".fixloop.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from .fixloop.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load .fixloop.yml: {}", e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("fixloop").join("fixloop.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Validate the configuration. Fails on the first problem found.
    pub fn validate(&self) -> Result<()> {
        for spec in &self.classifier.patterns {
            spec.compile()
                .context(format!("classifier.patterns: invalid pattern '{}'", spec.regex))?;
        }
        for (category, policy) in &self.retry.policies {
            if let Some(problem) = policy.problem() {
                eyre::bail!("retry.policies.{}: {}", category, problem);
            }
        }
        if self.context.max_tokens == 0 {
            eyre::bail!("context.max_tokens must be > 0");
        }
        if self.context.max_items == 0 {
            eyre::bail!("context.max_items must be > 0");
        }
        if self.metrics.anomaly_k.is_nan() || self.metrics.anomaly_k <= 0.0 {
            eyre::bail!("metrics.anomaly_k must be > 0");
        }
        if self.feedback.recurrence_threshold == 0 {
            eyre::bail!("feedback.recurrence_threshold must be > 0");
        }
        Ok(())
    }
}

/// Cache root and TTLs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding errors/, context/, metrics/ and feedback/.
    pub root: PathBuf,
    pub error_ttl_secs: u64,
    pub context_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".fixloop"),
            error_ttl_secs: 86_400, // 24 hours
            context_ttl_secs: 21_600, // 6 hours
        }
    }
}

impl CacheConfig {
    pub fn error_ttl(&self) -> Duration {
        Duration::from_secs(self.error_ttl_secs)
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_secs)
    }
}

/// Classification pattern table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Start from the built-in table.
    pub include_defaults: bool,

    /// Extra patterns, evaluated after the built-ins.
    pub patterns: Vec<PatternSpec>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            include_defaults: true,
            patterns: Vec::new(),
        }
    }
}

/// Retry behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub jitter: bool,

    /// Whole-policy overrides keyed by category.
    pub policies: BTreeMap<Category, RetryPolicy>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            jitter: true,
            policies: BTreeMap::new(),
        }
    }
}

/// Context collection limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_items: usize,
    pub max_tokens: usize,

    /// Files larger than this are never candidates.
    pub max_file_bytes: u64,

    /// Only this many most-recently-modified source files are considered.
    pub max_source_files: usize,

    pub skip_dirs: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_items: 20,
            max_tokens: 150_000,
            max_file_bytes: 100 * 1024,
            max_source_files: 50,
            skip_dirs: [
                ".git",
                "target",
                "node_modules",
                "__pycache__",
                ".venv",
                "venv",
                "build",
                "dist",
                ".fixloop",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Metrics analysis.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub window_days: u32,

    /// Standard deviations from the trailing mean that count as an anomaly.
    pub anomaly_k: f64,

    pub min_samples: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            anomaly_k: 2.0,
            min_samples: 5,
        }
    }
}

/// Feedback analysis.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub window_days: u32,
    pub recurrence_threshold: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            recurrence_threshold: 3,
        }
    }
}
