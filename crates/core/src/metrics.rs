//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Supervisor lock contention
//! - Job status transitions
//! - Supervisor actions

use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, Opts};

/// Supervisor lock attempts by result.
pub static SUPERVISOR_LOCK_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ingest_supervisor_lock_attempts_total",
            "Total attempts to take a deposit's supervisor lock",
        ),
        &["result"], // "acquired", "contended"
    )
    .unwrap()
});

/// Job status transitions by new status.
pub static JOB_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ingest_job_transitions_total",
            "Total job status transitions",
        ),
        &["status"],
    )
    .unwrap()
});

/// Stale jobs removed by reconciliation.
pub static STALE_JOBS_CLEARED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ingest_stale_jobs_cleared_total",
            "Total stale jobs removed from deposits",
        ),
        &["status"], // status the job was in, or "missing"
    )
    .unwrap()
});

/// Action requests handled by the supervisor.
pub static SUPERVISOR_ACTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ingest_supervisor_actions_total",
            "Total deposit action requests handled by the supervisor",
        ),
        &["action", "outcome"], // outcome: "applied", "ignored", "skipped"
    )
    .unwrap()
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(SUPERVISOR_LOCK_ATTEMPTS.clone()),
        Box::new(JOB_TRANSITIONS.clone()),
        Box::new(STALE_JOBS_CLEARED.clone()),
        Box::new(SUPERVISOR_ACTIONS.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_in_fresh_registry() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        JOB_TRANSITIONS.with_label_values(&["completed"]).inc();
        assert!(!registry.gather().is_empty());
    }
}
