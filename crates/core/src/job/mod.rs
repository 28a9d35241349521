//! Per-deposit job history.

mod store;
mod types;

pub use store::JobStatusStore;
pub use types::{JobEntry, JobField, JobStatus};
