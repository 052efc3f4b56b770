//! ID generation utilities for fixloop
//!
//! Provides timestamps and identifiers for error records, feedback items and runs.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Generate an error record ID
///
/// Format: `err-{timestamp_ms}-{random_hex}`
pub fn generate_record_id() -> String {
    let random: u16 = rand::rng().random();
    format!("err-{}-{:04x}", now_ms(), random)
}

/// Generate a feedback item ID
///
/// Format: `fb-{timestamp_ms}-{random_hex}`
pub fn generate_feedback_id() -> String {
    let random: u32 = rand::rng().random();
    format!("fb-{}-{:08x}", now_ms(), random)
}

/// Generate a run ID for ad-hoc invocations that were not given one
///
/// Format: `run-{timestamp_ms}-{random_hex}`
pub fn generate_run_id() -> String {
    let random: u16 = rand::rng().random();
    format!("run-{}-{:04x}", now_ms(), random)
}
