//! Append-only feedback log and its analysis.
//!
//! Records live in `<root>/feedback/feedback.jsonl`, one JSON object per line.
//! Each append is a single `write_all` of the full line in append mode, so
//! concurrent writers never interleave partial records and readers see a
//! record completely or not at all.

mod analyzer;
mod types;

pub use analyzer::{
    FeedbackAnalysis, FeedbackAnalyzer, GroupStats, OptimizationRecommendation, RecurringSignature,
};
pub use types::{FeedbackItem, FeedbackSource, FeedbackType, Outcome};

use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const FEEDBACK_FILE: &str = "feedback.jsonl";

pub struct FeedbackStore {
    path: PathBuf,
}

impl FeedbackStore {
    /// Log at `<dir>/feedback.jsonl`. Nothing touches the disk until the first append.
    pub fn open(dir: &Path) -> Self {
        Self {
            path: dir.join(FEEDBACK_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, item: &FeedbackItem) -> Result<()> {
        let mut line = serde_json::to_string(item)?;
        line.push('\n');
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        log::debug!("feedback {} appended ({} / {})", item.id, item.feedback_type, item.source);
        Ok(())
    }

    /// Every complete record, in append order.
    pub fn read_all(&self) -> Result<Vec<FeedbackItem>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(parse_lines(&content))
    }

    pub fn read_since(&self, since: DateTime<Utc>) -> Result<Vec<FeedbackItem>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|item| item.timestamp >= since)
            .collect())
    }
}

fn parse_lines(content: &str) -> Vec<FeedbackItem> {
    // A write still in flight leaves an unterminated last line.
    let complete = match content.rfind('\n') {
        Some(end) => &content[..end],
        None => return Vec::new(),
    };

    complete
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str::<FeedbackItem>(line) {
            Ok(item) => Some(item),
            Err(e) => {
                log::warn!("skipping unreadable feedback line {}: {}", index + 1, e);
                None
            }
        })
        .collect()
}
