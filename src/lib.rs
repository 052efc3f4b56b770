//! fixloop - error classification, adaptive retry and context caching for
//! automated fix/retry loops.
//!
//! A failing task hands its error text to the [`engine::FixEngine`], which
//! classifies it, decides whether and when to retry, builds a bounded context
//! bundle for the next attempt, records per-run metrics and appends a feedback
//! record once the failure is resolved or exhausted.

pub mod cache;
pub mod classify;
pub mod config;
pub mod context;
pub mod domain;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod id;
pub mod metrics;
pub mod report;
pub mod retry;

pub use error::{FixloopError, Result};
