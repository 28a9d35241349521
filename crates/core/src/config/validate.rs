use super::{
    types::{Config, LockStrategy, StoreBackend},
    ConfigError,
};

/// Validate configuration
/// Currently validates:
/// - Striped locks have at least one stripe
/// - SQLite backend has a database path
/// - Supervisor owner is non-empty and poll interval is not 0
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.locks.strategy == LockStrategy::Striped && config.locks.stripes == 0 {
        return Err(ConfigError::ValidationError(
            "locks.stripes must be greater than 0".to_string(),
        ));
    }

    if config.store.backend == StoreBackend::Sqlite && config.store.path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "store.path is required for the sqlite backend".to_string(),
        ));
    }

    if config.supervisor.owner.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "supervisor.owner cannot be empty".to_string(),
        ));
    }

    if config.supervisor.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "supervisor.poll_interval_ms cannot be 0".to_string(),
        ));
    }

    Ok(())
}
