//! Deposit lifecycle tracking.

mod store;
mod types;

pub use store::DepositStatusStore;
pub use types::{DepositAction, DepositField, DepositState};
