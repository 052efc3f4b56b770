//! Domain types for fixloop
//!
//! - Category / Severity: the failure taxonomy
//! - ErrorRecord: one observed failure and its lifecycle state
//! - TaskMeta: workflow/run identity supplied by the caller

pub mod category;
pub mod error_record;
pub mod task;

pub use category::{Category, Severity};
pub use error_record::{ErrorRecord, ErrorState};
pub use task::TaskMeta;
