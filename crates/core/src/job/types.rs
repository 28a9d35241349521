//! Job status and field-name types.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of one pipeline job.
///
/// `queued → working → {completed, failed, killed}`; `working → queued` is
/// the only backward transition (an interrupted job that will be retried).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Working,
    Completed,
    Failed,
    Killed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Working => "working",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Killed => "killed",
        }
    }

    /// Statuses left behind by a worker that never finished its job.
    /// These are what reconciliation removes.
    pub fn is_stale_candidate(&self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Queued | JobStatus::Working
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "working" => Ok(JobStatus::Working),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "killed" => Ok(JobStatus::Killed),
            _ => Err(()),
        }
    }
}

/// Field names of the `job-status:{id}` hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobField {
    Uuid,
    Name,
    Status,
    StartTime,
    EndTime,
    Message,
    Num,
    Total,
}

impl JobField {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobField::Uuid => "uuid",
            JobField::Name => "name",
            JobField::Status => "status",
            JobField::StartTime => "starttime",
            JobField::EndTime => "endtime",
            JobField::Message => "message",
            JobField::Num => "num",
            JobField::Total => "total",
        }
    }
}

impl AsRef<str> for JobField {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// One job of a deposit, as returned by
/// [`JobStatusStore::get_all_jobs`](super::JobStatusStore::get_all_jobs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEntry {
    pub job_id: String,
    pub fields: HashMap<String, String>,
}

impl JobEntry {
    pub fn name(&self) -> Option<&str> {
        self.fields.get(JobField::Name.as_str()).map(String::as_str)
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.fields
            .get(JobField::Status.as_str())
            .and_then(|s| s.parse().ok())
    }

    /// Percent complete, when the job has reported a non-zero total.
    pub fn percent_complete(&self) -> Option<f64> {
        let num: f64 = self.fields.get(JobField::Num.as_str())?.parse().ok()?;
        let total: f64 = self.fields.get(JobField::Total.as_str())?.parse().ok()?;
        if total <= 0.0 {
            return None;
        }
        Some(num / total * 100.0)
    }
}
