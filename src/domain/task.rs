//! Task metadata supplied by the CI orchestration around a run

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifies the job whose failure is being handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub workflow_id: String,
    pub run_id: String,
    pub project_root: PathBuf,
}

impl Default for TaskMeta {
    fn default() -> Self {
        Self {
            workflow_id: "local".to_string(),
            run_id: crate::id::generate_run_id(),
            project_root: PathBuf::from("."),
        }
    }
}

impl TaskMeta {
    pub fn new(
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            project_root: project_root.into(),
        }
    }
}
