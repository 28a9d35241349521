//! Poll-driven deposit supervisor.
//!
//! Each pass walks every registered deposit. Deposits with a pending action
//! request are handled under their supervisor lock: the request is applied
//! to the state (or ignored when it does not fit), then cleared. Deposits a
//! different supervisor currently holds are left for a later pass.

mod lease;

pub use lease::SupervisorLease;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::deposit::{DepositAction, DepositField, DepositState, DepositStatusStore};
use crate::job::JobStatusStore;
use crate::metrics;
use crate::store::StoreError;

/// What one supervisor pass did with a deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// The request was applied and the deposit moved to `state`.
    Applied {
        deposit_id: String,
        action: DepositAction,
        state: DepositState,
    },
    /// The deposit and its jobs were deleted.
    Destroyed { deposit_id: String },
    /// The request did not fit the deposit's state and was cleared.
    Ignored {
        deposit_id: String,
        action: DepositAction,
        state: Option<DepositState>,
    },
    /// Another supervisor holds the deposit; the request stays pending.
    Contended {
        deposit_id: String,
        action: DepositAction,
    },
    /// A terminal deposit was scheduled for removal.
    ExpiryScheduled { deposit_id: String, ttl_secs: u64 },
    /// A store call failed while handling this deposit; the pass moved on.
    Failed { deposit_id: String, error: String },
}

/// State a deposit moves to when `action` is applied in `state`, if the
/// action applies at all. Destroy is handled separately.
fn next_state(action: DepositAction, state: Option<DepositState>) -> Option<DepositState> {
    match (action, state) {
        (DepositAction::Register, None | Some(DepositState::Unregistered)) => {
            Some(DepositState::Queued)
        }
        (DepositAction::Pause, Some(DepositState::Running)) => Some(DepositState::Paused),
        (DepositAction::Resume, Some(DepositState::Paused)) => Some(DepositState::Running),
        (DepositAction::Resume, None | Some(DepositState::Unregistered)) => {
            Some(DepositState::Queued)
        }
        (DepositAction::Cancel, Some(s)) if !s.is_terminal() => Some(DepositState::Cancelled),
        _ => None,
    }
}

/// Drives deposits forward by polling their advisory fields.
pub struct Supervisor {
    deposits: DepositStatusStore,
    jobs: JobStatusStore,
    config: SupervisorConfig,
    /// Terminal deposits this process already scheduled for expiry, so each
    /// pass does not push the TTL back out.
    expiring: Mutex<HashSet<String>>,
}

impl Supervisor {
    pub fn new(deposits: DepositStatusStore, jobs: JobStatusStore, config: SupervisorConfig) -> Self {
        Self {
            deposits,
            jobs,
            config,
            expiring: Mutex::new(HashSet::new()),
        }
    }

    pub fn owner(&self) -> &str {
        &self.config.owner
    }

    /// Release every supervisor lock held under this supervisor's owner.
    ///
    /// Passes never hold a lease between calls, so at startup any lock with
    /// our owner was left by a previous run that died mid-pass. Returns the
    /// deposit ids released.
    pub fn reclaim_own_locks(&self) -> Result<Vec<String>, StoreError> {
        let mut reclaimed = Vec::new();
        for (deposit_id, fields) in self.deposits.get_all()? {
            let held_by_us = fields
                .get(DepositField::Lock.as_str())
                .is_some_and(|owner| owner == self.owner());
            if held_by_us {
                self.deposits.remove_supervisor_lock(&deposit_id)?;
                warn!(
                    "Reclaimed stale supervisor lock on deposit {}",
                    deposit_id
                );
                reclaimed.push(deposit_id);
            }
        }
        Ok(reclaimed)
    }

    /// Run one pass over every registered deposit.
    ///
    /// Fails only when the deposit listing itself fails. A store error on a
    /// single deposit is logged and reported as [`SupervisorOutcome::Failed`].
    pub fn poll_once(&self) -> Result<Vec<SupervisorOutcome>, StoreError> {
        let mut outcomes = Vec::new();

        if let Err(e) = self.deposits.prune_registry() {
            warn!("Failed to prune deposit registry: {}", e);
        }

        for (deposit_id, fields) in self.deposits.get_all()? {
            let action = fields
                .get(DepositField::ActionRequest.as_str())
                .and_then(|s| s.parse::<DepositAction>().ok());
            let state = fields
                .get(DepositField::State.as_str())
                .and_then(|s| s.parse::<DepositState>().ok());

            let handled = if let Some(action) = action {
                self.handle_action(&deposit_id, action)
            } else if state.is_some_and(|s| s.is_terminal()) {
                self.schedule_expiry(&deposit_id)
            } else {
                Ok(None)
            };

            match handled {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => {
                    warn!("Supervisor pass failed on deposit {}: {}", deposit_id, e);
                    outcomes.push(SupervisorOutcome::Failed {
                        deposit_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(outcomes)
    }

    fn handle_action(
        &self,
        deposit_id: &str,
        requested: DepositAction,
    ) -> Result<Option<SupervisorOutcome>, StoreError> {
        let Some(lease) = SupervisorLease::try_acquire(&self.deposits, deposit_id, self.owner())?
        else {
            metrics::SUPERVISOR_ACTIONS
                .with_label_values(&[requested.as_str(), "skipped"])
                .inc();
            debug!(
                "Deposit {} is held by another supervisor, leaving {} pending",
                deposit_id, requested
            );
            return Ok(Some(SupervisorOutcome::Contended {
                deposit_id: deposit_id.to_string(),
                action: requested,
            }));
        };

        // Re-read under the lease: another supervisor may have handled it
        // between our listing and taking the lock.
        let Some(action) = self.deposits.get_action_request(deposit_id)? else {
            lease.release()?;
            return Ok(None);
        };
        let state = self.deposits.get_state(deposit_id)?;

        if action == DepositAction::Destroy {
            self.jobs.delete_all(deposit_id)?;
            self.deposits.delete(deposit_id)?;
            lease.release()?;
            metrics::SUPERVISOR_ACTIONS
                .with_label_values(&[action.as_str(), "applied"])
                .inc();
            info!("Destroyed deposit {}", deposit_id);
            return Ok(Some(SupervisorOutcome::Destroyed {
                deposit_id: deposit_id.to_string(),
            }));
        }

        let outcome = match next_state(action, state) {
            Some(next) => {
                self.deposits.set_state(deposit_id, next)?;
                metrics::SUPERVISOR_ACTIONS
                    .with_label_values(&[action.as_str(), "applied"])
                    .inc();
                SupervisorOutcome::Applied {
                    deposit_id: deposit_id.to_string(),
                    action,
                    state: next,
                }
            }
            None => {
                metrics::SUPERVISOR_ACTIONS
                    .with_label_values(&[action.as_str(), "ignored"])
                    .inc();
                warn!(
                    "Ignoring {} request for deposit {} in state {}",
                    action,
                    deposit_id,
                    state.map(|s| s.as_str()).unwrap_or("absent")
                );
                SupervisorOutcome::Ignored {
                    deposit_id: deposit_id.to_string(),
                    action,
                    state,
                }
            }
        };

        self.deposits.clear_action_request(deposit_id)?;
        lease.release()?;
        Ok(Some(outcome))
    }

    fn schedule_expiry(&self, deposit_id: &str) -> Result<Option<SupervisorOutcome>, StoreError> {
        let Some(ttl_secs) = self.config.completed_ttl_secs else {
            return Ok(None);
        };
        if self.expiring.lock().contains(deposit_id) {
            return Ok(None);
        }

        self.jobs.expire_keys(deposit_id, ttl_secs)?;
        self.deposits.expire_keys(deposit_id, ttl_secs)?;
        self.expiring.lock().insert(deposit_id.to_string());
        info!("Deposit {} will expire in {}s", deposit_id, ttl_secs);
        Ok(Some(SupervisorOutcome::ExpiryScheduled {
            deposit_id: deposit_id.to_string(),
            ttl_secs,
        }))
    }

    /// Poll on the configured interval until a shutdown signal arrives.
    ///
    /// Store calls block, so each pass runs on the blocking thread pool.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        info!("Supervisor {} started", self.owner());

        let supervisor = self.clone();
        match tokio::task::spawn_blocking(move || supervisor.reclaim_own_locks()).await {
            Ok(Ok(reclaimed)) if !reclaimed.is_empty() => {
                info!("Reclaimed {} stale supervisor locks", reclaimed.len());
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Failed to reclaim stale supervisor locks: {}", e),
            Err(e) => error!("Lock reclamation panicked: {}", e),
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Supervisor {} received shutdown signal", self.owner());
                    break;
                }
                _ = interval.tick() => {
                    let supervisor = self.clone();
                    match tokio::task::spawn_blocking(move || supervisor.poll_once()).await {
                        Ok(Ok(outcomes)) => {
                            for outcome in &outcomes {
                                debug!("Supervisor pass: {:?}", outcome);
                            }
                        }
                        Ok(Err(e)) => warn!("Supervisor pass failed: {}", e),
                        Err(e) => error!("Supervisor pass panicked: {}", e),
                    }
                }
            }
        }

        info!("Supervisor {} stopped", self.owner());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StatusStore};

    struct Harness {
        deposits: DepositStatusStore,
        jobs: JobStatusStore,
        supervisor: Supervisor,
    }

    fn harness(completed_ttl_secs: Option<u64>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let deposits = DepositStatusStore::new(store.clone());
        let jobs = JobStatusStore::new(store);
        let config = SupervisorConfig {
            owner: "supervisor-test".to_string(),
            poll_interval_ms: 10,
            completed_ttl_secs,
        };
        let supervisor = Supervisor::new(deposits.clone(), jobs.clone(), config);
        Harness {
            deposits,
            jobs,
            supervisor,
        }
    }

    fn register(deposits: &DepositStatusStore, id: &str, state: DepositState) {
        let fields = std::collections::HashMap::from([
            ("uuid".to_string(), id.to_string()),
            ("state".to_string(), state.as_str().to_string()),
        ]);
        deposits.save(id, &fields).unwrap();
    }

    #[test]
    fn test_next_state_table() {
        use DepositAction::*;
        use DepositState::*;

        assert_eq!(next_state(Register, Some(Unregistered)), Some(Queued));
        assert_eq!(next_state(Register, None), Some(Queued));
        assert_eq!(next_state(Register, Some(Running)), None);
        assert_eq!(next_state(Pause, Some(Running)), Some(Paused));
        assert_eq!(next_state(Pause, Some(Queued)), None);
        assert_eq!(next_state(Resume, Some(Paused)), Some(Running));
        assert_eq!(next_state(Resume, Some(Running)), None);
        assert_eq!(next_state(Cancel, Some(Paused)), Some(Cancelled));
        assert_eq!(next_state(Cancel, Some(Finished)), None);
        assert_eq!(next_state(Cancel, None), None);
    }

    #[test]
    fn test_pause_request_applied_and_cleared() {
        let h = harness(None);
        register(&h.deposits, "d1", DepositState::Running);
        h.deposits.request_action("d1", DepositAction::Pause).unwrap();

        let outcomes = h.supervisor.poll_once().unwrap();
        assert_eq!(
            outcomes,
            vec![SupervisorOutcome::Applied {
                deposit_id: "d1".to_string(),
                action: DepositAction::Pause,
                state: DepositState::Paused,
            }]
        );
        assert_eq!(h.deposits.get_state("d1").unwrap(), Some(DepositState::Paused));
        assert_eq!(h.deposits.get_action_request("d1").unwrap(), None);
        assert_eq!(h.deposits.get_supervisor_lock("d1").unwrap(), None);
    }

    #[test]
    fn test_request_left_pending_when_lock_held() {
        let h = harness(None);
        register(&h.deposits, "d1", DepositState::Running);
        h.deposits.request_action("d1", DepositAction::Cancel).unwrap();
        assert!(h.deposits.add_supervisor_lock("d1", "someone-else").unwrap());

        let outcomes = h.supervisor.poll_once().unwrap();
        assert!(matches!(outcomes[0], SupervisorOutcome::Contended { .. }));
        assert_eq!(h.deposits.get_state("d1").unwrap(), Some(DepositState::Running));
        assert_eq!(
            h.deposits.get_action_request("d1").unwrap(),
            Some(DepositAction::Cancel)
        );
        assert_eq!(
            h.deposits.get_supervisor_lock("d1").unwrap().as_deref(),
            Some("someone-else")
        );
    }

    #[test]
    fn test_inapplicable_request_ignored_and_cleared() {
        let h = harness(None);
        register(&h.deposits, "d1", DepositState::Finished);
        h.deposits.request_action("d1", DepositAction::Pause).unwrap();

        let outcomes = h.supervisor.poll_once().unwrap();
        assert!(matches!(outcomes[0], SupervisorOutcome::Ignored { .. }));
        assert_eq!(h.deposits.get_state("d1").unwrap(), Some(DepositState::Finished));
        assert_eq!(h.deposits.get_action_request("d1").unwrap(), None);
    }

    #[test]
    fn test_destroy_removes_deposit_and_jobs() {
        let h = harness(None);
        register(&h.deposits, "d1", DepositState::Running);
        h.jobs.started("j1", "d1", "Ingest").unwrap();
        h.deposits.request_action("d1", DepositAction::Destroy).unwrap();

        let outcomes = h.supervisor.poll_once().unwrap();
        assert_eq!(
            outcomes,
            vec![SupervisorOutcome::Destroyed {
                deposit_id: "d1".to_string()
            }]
        );
        assert!(h.deposits.get("d1").unwrap().is_empty());
        assert!(h.jobs.get_job_ids("d1").unwrap().is_empty());
        assert!(h.jobs.get("j1").unwrap().is_empty());
    }

    #[test]
    fn test_terminal_deposit_expiry_scheduled_once() {
        let h = harness(Some(3600));
        register(&h.deposits, "d1", DepositState::Finished);
        register(&h.deposits, "d2", DepositState::Running);

        let outcomes = h.supervisor.poll_once().unwrap();
        assert_eq!(
            outcomes,
            vec![SupervisorOutcome::ExpiryScheduled {
                deposit_id: "d1".to_string(),
                ttl_secs: 3600,
            }]
        );
        assert!(h.supervisor.poll_once().unwrap().is_empty());
    }

    #[test]
    fn test_no_expiry_without_ttl() {
        let h = harness(None);
        register(&h.deposits, "d1", DepositState::Cancelled);
        assert!(h.supervisor.poll_once().unwrap().is_empty());
    }

    #[test]
    fn test_reclaims_own_lock_left_by_crashed_run() {
        let h = harness(None);
        register(&h.deposits, "d1", DepositState::Running);
        register(&h.deposits, "d2", DepositState::Running);
        h.deposits.request_action("d1", DepositAction::Cancel).unwrap();
        // A previous run died holding d1; another supervisor holds d2.
        assert!(h.deposits.add_supervisor_lock("d1", "supervisor-test").unwrap());
        assert!(h.deposits.add_supervisor_lock("d2", "someone-else").unwrap());

        for _ in 0..2 {
            assert!(matches!(
                h.supervisor.poll_once().unwrap()[0],
                SupervisorOutcome::Contended { .. }
            ));
        }

        assert_eq!(h.supervisor.reclaim_own_locks().unwrap(), vec!["d1".to_string()]);
        assert_eq!(
            h.deposits.get_supervisor_lock("d2").unwrap().as_deref(),
            Some("someone-else")
        );

        let outcomes = h.supervisor.poll_once().unwrap();
        assert_eq!(
            outcomes,
            vec![SupervisorOutcome::Applied {
                deposit_id: "d1".to_string(),
                action: DepositAction::Cancel,
                state: DepositState::Cancelled,
            }]
        );
    }

    #[test]
    fn test_store_error_on_one_deposit_does_not_stop_pass() {
        let store = Arc::new(MemoryStore::new());
        let deposits = DepositStatusStore::new(store.clone());
        let jobs = JobStatusStore::new(store.clone());
        let supervisor = Supervisor::new(
            deposits.clone(),
            jobs,
            SupervisorConfig {
                owner: "supervisor-test".to_string(),
                poll_interval_ms: 10,
                completed_ttl_secs: None,
            },
        );

        register(&deposits, "d1", DepositState::Running);
        register(&deposits, "d2", DepositState::Running);
        deposits.request_action("d1", DepositAction::Destroy).unwrap();
        deposits.request_action("d2", DepositAction::Pause).unwrap();
        // d1's job list key holds a set, so reading it fails.
        store
            .sadd(&crate::store::keys::deposit_jobs("d1"), "j1")
            .unwrap();

        let mut outcomes = supervisor.poll_once().unwrap();
        outcomes.sort_by_key(|o| format!("{:?}", o));
        assert!(matches!(
            &outcomes[0],
            SupervisorOutcome::Applied { deposit_id, .. } if deposit_id == "d2"
        ));
        assert!(matches!(
            &outcomes[1],
            SupervisorOutcome::Failed { deposit_id, .. } if deposit_id == "d1"
        ));
        assert_eq!(deposits.get_state("d2").unwrap(), Some(DepositState::Paused));
        assert_eq!(deposits.get_supervisor_lock("d1").unwrap(), None);
    }

    #[test]
    fn test_pass_prunes_expired_registrations() {
        let h = harness(None);
        register(&h.deposits, "d1", DepositState::Finished);
        h.deposits.expire_keys("d1", 0).unwrap();

        assert!(h.supervisor.poll_once().unwrap().is_empty());
        assert!(h.deposits.prune_registry().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_applies_requests_until_shutdown() {
        let h = harness(None);
        register(&h.deposits, "d1", DepositState::Paused);
        h.deposits.request_action("d1", DepositAction::Resume).unwrap();

        let supervisor = Arc::new(h.supervisor);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(supervisor.run(shutdown_rx));

        let mut resumed = false;
        for _ in 0..100 {
            if h.deposits.get_state("d1").unwrap() == Some(DepositState::Running) {
                resumed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(resumed);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
