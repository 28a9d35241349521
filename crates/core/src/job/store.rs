//! Job status tracking, scoped to the owning deposit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::metrics;
use crate::store::{keys, now_millis, StatusStore, StoreError};

use super::{JobEntry, JobField, JobStatus};

/// Tracks per-job fields and each deposit's ordered job history.
///
/// A job is only reachable through its deposit's `deposit-to-jobs` list, in
/// the order its `started` call appended it. Every per-deposit query walks
/// that list and reads each job's hash, so results are not a snapshot.
#[derive(Clone)]
pub struct JobStatusStore {
    store: Arc<dyn StatusStore>,
}

impl JobStatusStore {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    fn set_status(&self, job_id: &str, status: JobStatus, extra: &[(&str, &str)]) -> Result<(), StoreError> {
        let mut fields = vec![(JobField::Status.as_str(), status.as_str())];
        fields.extend_from_slice(extra);
        self.store.hset_multiple(&keys::job_status(job_id), &fields)?;
        metrics::JOB_TRANSITIONS
            .with_label_values(&[status.as_str()])
            .inc();
        Ok(())
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Record that a job began and append it to the deposit's job list.
    ///
    /// Retries of the same job class append new entries; list order is
    /// always append order.
    pub fn started(&self, job_id: &str, deposit_id: &str, job_class: &str) -> Result<(), StoreError> {
        let start = now_millis().to_string();
        self.store.hset_multiple(
            &keys::job_status(job_id),
            &[
                (JobField::Uuid.as_str(), job_id),
                (JobField::Name.as_str(), job_class),
                (JobField::Status.as_str(), JobStatus::Working.as_str()),
                (JobField::StartTime.as_str(), start.as_str()),
                (JobField::Num.as_str(), "0"),
            ],
        )?;
        self.store.rpush(&keys::deposit_jobs(deposit_id), job_id)?;
        metrics::JOB_TRANSITIONS
            .with_label_values(&[JobStatus::Working.as_str()])
            .inc();
        info!("Job {} ({}) started for deposit {}", job_id, job_class, deposit_id);
        Ok(())
    }

    pub fn failed(&self, job_id: &str, message: Option<&str>) -> Result<(), StoreError> {
        let end = now_millis().to_string();
        let mut extra = vec![(JobField::EndTime.as_str(), end.as_str())];
        if let Some(message) = message {
            extra.push((JobField::Message.as_str(), message));
        }
        self.set_status(job_id, JobStatus::Failed, &extra)?;
        warn!("Job {} failed: {}", job_id, message.unwrap_or("no message"));
        Ok(())
    }

    /// Put a job back to queued so it will be retried. It keeps its id and
    /// its position in the deposit's job list.
    pub fn interrupted(&self, job_id: &str) -> Result<(), StoreError> {
        self.set_status(job_id, JobStatus::Queued, &[])?;
        info!("Job {} interrupted, requeued", job_id);
        Ok(())
    }

    pub fn completed(&self, job_id: &str) -> Result<(), StoreError> {
        let end = now_millis().to_string();
        self.set_status(
            job_id,
            JobStatus::Completed,
            &[(JobField::EndTime.as_str(), end.as_str())],
        )?;
        info!("Job {} completed", job_id);
        Ok(())
    }

    pub fn killed(&self, job_id: &str) -> Result<(), StoreError> {
        let end = now_millis().to_string();
        self.set_status(
            job_id,
            JobStatus::Killed,
            &[(JobField::EndTime.as_str(), end.as_str())],
        )?;
        info!("Job {} killed", job_id);
        Ok(())
    }

    // ========================================================================
    // Progress
    // ========================================================================

    /// Atomically add to the job's completed-unit count, returning the new value.
    pub fn incr_completion(&self, job_id: &str, amount: i64) -> Result<i64, StoreError> {
        self.store
            .hincr_by(&keys::job_status(job_id), JobField::Num.as_str(), amount)
    }

    pub fn set_total_completion(&self, job_id: &str, total: i64) -> Result<(), StoreError> {
        let total = total.to_string();
        self.store.hset_multiple(
            &keys::job_status(job_id),
            &[(JobField::Total.as_str(), total.as_str())],
        )
    }

    // ========================================================================
    // Single-job reads
    // ========================================================================

    /// Stored status of a job. Missing or unparseable values yield `None`.
    pub fn get_job_state(&self, job_id: &str) -> Result<Option<JobStatus>, StoreError> {
        let raw = self
            .store
            .hget(&keys::job_status(job_id), JobField::Status.as_str())?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }

    pub fn get(&self, job_id: &str) -> Result<HashMap<String, String>, StoreError> {
        self.store.hgetall(&keys::job_status(job_id))
    }

    // ========================================================================
    // Deposit-scoped reads
    // ========================================================================

    /// Job ids of a deposit in execution order.
    pub fn get_job_ids(&self, deposit_id: &str) -> Result<Vec<String>, StoreError> {
        self.store.lrange(&keys::deposit_jobs(deposit_id))
    }

    /// Every job of a deposit with its fields, in execution order.
    ///
    /// List entries whose hash record is gone are still reported, with no fields.
    pub fn get_all_jobs(&self, deposit_id: &str) -> Result<Vec<JobEntry>, StoreError> {
        self.get_job_ids(deposit_id)?
            .into_iter()
            .map(|job_id| {
                let fields = self.get(&job_id)?;
                Ok(JobEntry { job_id, fields })
            })
            .collect()
    }

    /// Class names of the deposit's completed jobs, in execution order.
    ///
    /// Used on resume to decide which pipeline stages can be skipped.
    pub fn get_successful_job_names(&self, deposit_id: &str) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in self.get_all_jobs(deposit_id)? {
            if entry.status() == Some(JobStatus::Completed) {
                if let Some(name) = entry.name() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// First job of the deposit, in execution order, with the given status.
    pub fn get_job_by_status(
        &self,
        deposit_id: &str,
        status: JobStatus,
    ) -> Result<Option<String>, StoreError> {
        for job_id in self.get_job_ids(deposit_id)? {
            if self.get_job_state(&job_id)? == Some(status) {
                return Ok(Some(job_id));
            }
        }
        Ok(None)
    }

    pub fn get_working_job(&self, deposit_id: &str) -> Result<Option<String>, StoreError> {
        self.get_job_by_status(deposit_id, JobStatus::Working)
    }

    /// All jobs of the deposit with the given status, in execution order.
    pub fn get_jobs_by_status(
        &self,
        deposit_id: &str,
        status: JobStatus,
    ) -> Result<Vec<String>, StoreError> {
        let mut matching = Vec::new();
        for job_id in self.get_job_ids(deposit_id)? {
            if self.get_job_state(&job_id)? == Some(status) {
                matching.push(job_id);
            }
        }
        Ok(matching)
    }

    // ========================================================================
    // Reconciliation and cleanup
    // ========================================================================

    /// Remove every failed, queued or working job from the deposit, both its
    /// hash record and its list entry. Completed and killed jobs stay.
    ///
    /// List entries with no hash record at all are dropped too. Returns the
    /// ids that were removed.
    pub fn clear_stale(&self, deposit_id: &str) -> Result<Vec<String>, StoreError> {
        let list_key = keys::deposit_jobs(deposit_id);
        let mut removed = Vec::new();

        for job_id in self.get_job_ids(deposit_id)? {
            let fields = self.get(&job_id)?;
            let label = if fields.is_empty() {
                "missing"
            } else {
                match fields
                    .get(JobField::Status.as_str())
                    .and_then(|s| s.parse::<JobStatus>().ok())
                {
                    Some(status) if status.is_stale_candidate() => status.as_str(),
                    _ => continue,
                }
            };

            self.store.del(&[keys::job_status(&job_id).as_str()])?;
            self.store.lrem(&list_key, &job_id)?;
            metrics::STALE_JOBS_CLEARED.with_label_values(&[label]).inc();
            debug!("Cleared {} job {} from deposit {}", label, job_id, deposit_id);
            removed.push(job_id);
        }

        if !removed.is_empty() {
            info!(
                "Cleared {} stale jobs from deposit {}",
                removed.len(),
                deposit_id
            );
        }
        Ok(removed)
    }

    /// Delete every job record of the deposit and the job list itself.
    pub fn delete_all(&self, deposit_id: &str) -> Result<(), StoreError> {
        let list_key = keys::deposit_jobs(deposit_id);
        let mut doomed: Vec<String> = self
            .get_job_ids(deposit_id)?
            .iter()
            .map(|job_id| keys::job_status(job_id))
            .collect();
        doomed.push(list_key);

        let doomed_refs: Vec<&str> = doomed.iter().map(String::as_str).collect();
        let removed = self.store.del(&doomed_refs)?;
        debug!("Deleted {} job keys of deposit {}", removed, deposit_id);
        Ok(())
    }

    /// Schedule best-effort removal of every job record of the deposit and
    /// the job list.
    pub fn expire_keys(&self, deposit_id: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let ttl = Duration::from_secs(ttl_seconds);
        for job_id in self.get_job_ids(deposit_id)? {
            self.store.expire(&keys::job_status(&job_id), ttl)?;
        }
        self.store.expire(&keys::deposit_jobs(deposit_id), ttl)?;
        Ok(())
    }
}
