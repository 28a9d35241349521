pub mod config;
pub mod deposit;
pub mod job;
pub mod lock;
pub mod metrics;
pub mod store;
pub mod supervisor;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, LockConfig,
    LockStrategy, StoreBackend, StoreConfig, SupervisorConfig,
};
pub use deposit::{DepositAction, DepositField, DepositState, DepositStatusStore};
pub use job::{JobEntry, JobField, JobStatus, JobStatusStore};
pub use lock::{
    create_object_lock, DynamicObjectLock, ObjectLock, ObjectLockGuard, StripedObjectLock,
};
pub use store::{create_store, MemoryStore, SqliteStore, StatusStore, StoreError};
pub use supervisor::{Supervisor, SupervisorLease, SupervisorOutcome};
