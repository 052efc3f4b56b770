//! Configuration system for fixloop.
//!
//! A single YAML file with one section per component. Every section has
//! defaults, so an empty file (or none at all) is a valid configuration.
//! `Config::load` searches an explicit path, then `.fixloop.yml`, then
//! `~/.config/fixloop/fixloop.yml`, and falls back to defaults.

pub use self::global::{
    CacheConfig, ClassifierConfig, Config, ContextConfig, FeedbackConfig, MetricsConfig,
    RetryConfig,
};

mod global;
