//! Deposit status tracking against the shared store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::metrics;
use crate::store::{keys, StatusStore, StoreError};

use super::{DepositAction, DepositField, DepositState};

/// Tracks per-deposit fields, membership, upload confirmation sets and the
/// supervisor ownership lock.
///
/// Any number of processes may hold a `DepositStatusStore` over the same
/// backing store. Only the supervisor lock provides mutual exclusion between
/// them; every other write is last-writer-wins.
#[derive(Clone)]
pub struct DepositStatusStore {
    store: Arc<dyn StatusStore>,
}

impl DepositStatusStore {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    /// Full field map of one deposit. Unknown deposits yield an empty map.
    pub fn get(&self, deposit_id: &str) -> Result<HashMap<String, String>, StoreError> {
        self.store.hgetall(&keys::deposit_status(deposit_id))
    }

    /// Field maps of every registered deposit, keyed by deposit id.
    ///
    /// Ids still registered but whose status hash is gone (deleted or
    /// expired) are skipped.
    pub fn get_all(&self) -> Result<HashMap<String, HashMap<String, String>>, StoreError> {
        let mut deposits = HashMap::new();
        for deposit_id in self.store.smembers(keys::DEPOSITS)? {
            let fields = self.get(&deposit_id)?;
            if !fields.is_empty() {
                deposits.insert(deposit_id, fields);
            }
        }
        Ok(deposits)
    }

    /// Merge-write fields and register the deposit id.
    ///
    /// The ingested counters are dropped from the write: they only change
    /// through [`incr_ingested_octets`](Self::incr_ingested_octets) and
    /// [`incr_ingested_objects`](Self::incr_ingested_objects).
    pub fn save(
        &self,
        deposit_id: &str,
        fields: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut writable: Vec<(&str, &str)> = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            if DepositField::is_counter(field) {
                warn!(
                    "Ignoring counter field {} in save of deposit {}",
                    field, deposit_id
                );
                continue;
            }
            writable.push((field.as_str(), value.as_str()));
        }

        self.store
            .hset_multiple(&keys::deposit_status(deposit_id), &writable)?;
        self.store.sadd(keys::DEPOSITS, deposit_id)?;
        debug!("Saved {} fields of deposit {}", writable.len(), deposit_id);
        Ok(())
    }

    pub fn set(
        &self,
        deposit_id: &str,
        field: impl AsRef<str>,
        value: &str,
    ) -> Result<(), StoreError> {
        self.store.hset_multiple(
            &keys::deposit_status(deposit_id),
            &[(field.as_ref(), value)],
        )
    }

    pub fn delete_field(&self, deposit_id: &str, field: impl AsRef<str>) -> Result<(), StoreError> {
        self.store
            .hdel(&keys::deposit_status(deposit_id), field.as_ref())?;
        Ok(())
    }

    // ========================================================================
    // Supervisor lock
    // ========================================================================

    /// Claim the deposit for `owner` if no supervisor holds it.
    ///
    /// Returns true iff this call set the lock. Callers that get false must
    /// not act as the deposit's supervisor.
    pub fn add_supervisor_lock(&self, deposit_id: &str, owner: &str) -> Result<bool, StoreError> {
        let acquired = self.store.hsetnx(
            &keys::deposit_status(deposit_id),
            DepositField::Lock.as_str(),
            owner,
        )?;

        if acquired {
            metrics::SUPERVISOR_LOCK_ATTEMPTS
                .with_label_values(&["acquired"])
                .inc();
            debug!("{} took supervisor lock on deposit {}", owner, deposit_id);
        } else {
            metrics::SUPERVISOR_LOCK_ATTEMPTS
                .with_label_values(&["contended"])
                .inc();
            debug!(
                "{} could not take supervisor lock on deposit {}: already held",
                owner, deposit_id
            );
        }
        Ok(acquired)
    }

    /// Clear the supervisor lock regardless of who holds it.
    pub fn remove_supervisor_lock(&self, deposit_id: &str) -> Result<(), StoreError> {
        self.delete_field(deposit_id, DepositField::Lock)?;
        debug!("Released supervisor lock on deposit {}", deposit_id);
        Ok(())
    }

    /// Current holder of the supervisor lock, if any.
    pub fn get_supervisor_lock(&self, deposit_id: &str) -> Result<Option<String>, StoreError> {
        self.store.hget(
            &keys::deposit_status(deposit_id),
            DepositField::Lock.as_str(),
        )
    }

    // ========================================================================
    // State and action requests
    // ========================================================================

    /// Stored lifecycle state. Missing or unparseable values yield `None`.
    pub fn get_state(&self, deposit_id: &str) -> Result<Option<DepositState>, StoreError> {
        let raw = self.store.hget(
            &keys::deposit_status(deposit_id),
            DepositField::State.as_str(),
        )?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }

    pub fn set_state(&self, deposit_id: &str, state: DepositState) -> Result<(), StoreError> {
        self.set(deposit_id, DepositField::State, state.as_str())?;
        info!("Deposit {} is now {}", deposit_id, state);
        Ok(())
    }

    /// Post an advisory action for the supervising process. Does not touch the state.
    pub fn request_action(&self, deposit_id: &str, action: DepositAction) -> Result<(), StoreError> {
        self.set(deposit_id, DepositField::ActionRequest, action.as_str())?;
        debug!("Requested {} for deposit {}", action, deposit_id);
        Ok(())
    }

    pub fn clear_action_request(&self, deposit_id: &str) -> Result<(), StoreError> {
        self.delete_field(deposit_id, DepositField::ActionRequest)
    }

    /// Pending action request. Missing or unparseable values yield `None`.
    pub fn get_action_request(
        &self,
        deposit_id: &str,
    ) -> Result<Option<DepositAction>, StoreError> {
        let raw = self.store.hget(
            &keys::deposit_status(deposit_id),
            DepositField::ActionRequest.as_str(),
        )?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }

    // ========================================================================
    // Uploads
    // ========================================================================

    /// Whether this deposit already started uploading before, e.g. in a
    /// process that has since restarted.
    pub fn is_resumed_deposit(&self, deposit_id: &str) -> Result<bool, StoreError> {
        self.store.exists(&keys::uploaded(deposit_id))
    }

    /// Uploaded object ids that have not been confirmed yet. Recomputed on every call.
    pub fn get_unconfirmed_uploads(&self, deposit_id: &str) -> Result<HashSet<String>, StoreError> {
        self.store
            .sdiff(&keys::uploaded(deposit_id), &keys::confirmed(deposit_id))
    }

    pub fn get_confirmed_uploads(&self, deposit_id: &str) -> Result<HashSet<String>, StoreError> {
        self.store.smembers(&keys::confirmed(deposit_id))
    }

    pub fn add_uploaded_pid(&self, deposit_id: &str, pid: &str) -> Result<(), StoreError> {
        self.store.sadd(&keys::uploaded(deposit_id), pid)?;
        Ok(())
    }

    pub fn add_confirmed_pid(&self, deposit_id: &str, pid: &str) -> Result<(), StoreError> {
        self.store.sadd(&keys::confirmed(deposit_id), pid)?;
        Ok(())
    }

    // ========================================================================
    // Counters
    // ========================================================================

    /// Atomically add to the ingested byte count, returning the new total.
    pub fn incr_ingested_octets(&self, deposit_id: &str, amount: i64) -> Result<i64, StoreError> {
        self.store.hincr_by(
            &keys::deposit_status(deposit_id),
            DepositField::IngestedOctets.as_str(),
            amount,
        )
    }

    /// Atomically add to the ingested object count, returning the new total.
    pub fn incr_ingested_objects(&self, deposit_id: &str, amount: i64) -> Result<i64, StoreError> {
        self.store.hincr_by(
            &keys::deposit_status(deposit_id),
            DepositField::IngestedObjects.as_str(),
            amount,
        )
    }

    // ========================================================================
    // Failure and cleanup
    // ========================================================================

    /// Record a failure as data: state becomes failed and the error's type
    /// and message are kept as a string.
    ///
    /// `E` must be the concrete error type. Callers holding only a trait
    /// object name the type themselves through [`fail_with`](Self::fail_with).
    pub fn fail<E>(&self, deposit_id: &str, err: &E) -> Result<(), StoreError>
    where
        E: std::error::Error + 'static,
    {
        self.fail_with(deposit_id, std::any::type_name::<E>(), &err.to_string())
    }

    /// Record a failure whose type name the caller supplies.
    pub fn fail_with(
        &self,
        deposit_id: &str,
        error_type: &str,
        error_message: &str,
    ) -> Result<(), StoreError> {
        let message = format!("{}: {}", error_type, error_message);
        self.store.hset_multiple(
            &keys::deposit_status(deposit_id),
            &[
                (DepositField::State.as_str(), DepositState::Failed.as_str()),
                (DepositField::ErrorMessage.as_str(), message.as_str()),
            ],
        )?;
        warn!("Deposit {} failed: {}", deposit_id, message);
        Ok(())
    }

    /// Remove the deposit's status, upload sets and registration now.
    pub fn delete(&self, deposit_id: &str) -> Result<(), StoreError> {
        let status = keys::deposit_status(deposit_id);
        let uploaded = keys::uploaded(deposit_id);
        let confirmed = keys::confirmed(deposit_id);
        self.store
            .del(&[status.as_str(), uploaded.as_str(), confirmed.as_str()])?;
        self.store.srem(keys::DEPOSITS, deposit_id)?;
        info!("Deleted deposit {}", deposit_id);
        Ok(())
    }

    /// Unregister deposit ids whose status hash no longer exists, e.g. after
    /// their keys expired. Returns the ids removed.
    ///
    /// A deposit re-saved between the existence check and the removal loses
    /// its registration until its next `save`.
    pub fn prune_registry(&self) -> Result<Vec<String>, StoreError> {
        let mut pruned = Vec::new();
        for deposit_id in self.store.smembers(keys::DEPOSITS)? {
            if !self.store.exists(&keys::deposit_status(&deposit_id))?
                && self.store.srem(keys::DEPOSITS, &deposit_id)?
            {
                pruned.push(deposit_id);
            }
        }
        if !pruned.is_empty() {
            debug!("Pruned {} vanished deposits from the registry", pruned.len());
        }
        Ok(pruned)
    }

    /// Schedule best-effort removal of the deposit's status and upload sets.
    ///
    /// The id stays registered until [`prune_registry`](Self::prune_registry)
    /// runs after the keys are gone.
    pub fn expire_keys(&self, deposit_id: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let ttl = Duration::from_secs(ttl_seconds);
        for key in [
            keys::deposit_status(deposit_id),
            keys::uploaded(deposit_id),
            keys::confirmed(deposit_id),
        ] {
            self.store.expire(&key, ttl)?;
        }
        debug!("Deposit {} keys expire in {}s", deposit_id, ttl_seconds);
        Ok(())
    }
}
