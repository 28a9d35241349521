use tracing::warn;

use crate::deposit::DepositStatusStore;
use crate::store::StoreError;

/// Exclusive, short-lived ownership of one deposit's orchestration.
///
/// Taken with the deposit's supervisor lock and given back on
/// [`release`](Self::release) or drop. Hold it for one batch of
/// orchestration work, not for a deposit's whole lifetime.
pub struct SupervisorLease {
    deposits: DepositStatusStore,
    deposit_id: String,
    released: bool,
}

impl SupervisorLease {
    /// Take the deposit's supervisor lock for `owner`.
    ///
    /// Returns `None` when another owner holds it.
    pub fn try_acquire(
        deposits: &DepositStatusStore,
        deposit_id: &str,
        owner: &str,
    ) -> Result<Option<Self>, StoreError> {
        if !deposits.add_supervisor_lock(deposit_id, owner)? {
            return Ok(None);
        }
        Ok(Some(Self {
            deposits: deposits.clone(),
            deposit_id: deposit_id.to_string(),
            released: false,
        }))
    }

    pub fn deposit_id(&self) -> &str {
        &self.deposit_id
    }

    /// Release the lock, reporting store failures to the caller.
    pub fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        self.deposits.remove_supervisor_lock(&self.deposit_id)
    }
}

impl Drop for SupervisorLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.deposits.remove_supervisor_lock(&self.deposit_id) {
            warn!(
                "Failed to release supervisor lock on deposit {}: {}",
                self.deposit_id, e
            );
        }
    }
}
