use gethostname::gethostname;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Status store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// Database file shared by every process (sqlite backend only)
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// How long to wait on another process's write lock (milliseconds)
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_store_path() -> PathBuf {
    PathBuf::from("ingest-status.db")
}

fn default_busy_timeout() -> u64 {
    5000
}

/// Available status store backends
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local, for tests and single-process runs
    Memory,
    /// SQLite file shared across processes
    Sqlite,
}

/// Object lock configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockConfig {
    #[serde(default = "default_strategy")]
    pub strategy: LockStrategy,
    /// Number of stripes (striped strategy only)
    #[serde(default = "default_stripes")]
    pub stripes: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            stripes: default_stripes(),
        }
    }
}

fn default_strategy() -> LockStrategy {
    LockStrategy::Striped
}

fn default_stripes() -> usize {
    64
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockStrategy {
    /// One lock per object id, created lazily and never evicted
    Dynamic,
    /// Fixed array of locks that object ids hash into
    Striped,
}

/// Supervisor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupervisorConfig {
    /// Owner string written into a deposit's lock field while supervising it.
    /// Must be unique per supervisor and stable across its restarts, so a
    /// restarted supervisor can reclaim the locks it left behind.
    #[serde(default = "default_owner")]
    pub owner: String,
    /// How often to poll deposits for action requests (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Expire finished/cancelled/failed deposits after this many seconds.
    /// None keeps them until deleted explicitly.
    #[serde(default)]
    pub completed_ttl_secs: Option<u64>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            poll_interval_ms: default_poll_interval(),
            completed_ttl_secs: None,
        }
    }
}

fn default_owner() -> String {
    format!("supervisor-{}", gethostname().to_string_lossy())
}

fn default_poll_interval() -> u64 {
    1000 // 1 second
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.path.to_str().unwrap(), "ingest-status.db");
        assert_eq!(config.store.busy_timeout_ms, 5000);
        assert_eq!(config.locks.strategy, LockStrategy::Striped);
        assert_eq!(config.locks.stripes, 64);
        assert!(config.supervisor.owner.starts_with("supervisor-"));
        assert_eq!(config.supervisor.poll_interval_ms, 1000);
        assert!(config.supervisor.completed_ttl_secs.is_none());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[store]
backend = "memory"
path = "/var/lib/ingest/status.db"
busy_timeout_ms = 250

[locks]
strategy = "dynamic"

[supervisor]
owner = "host-a"
poll_interval_ms = 200
completed_ttl_secs = 86400
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.busy_timeout_ms, 250);
        assert_eq!(config.locks.strategy, LockStrategy::Dynamic);
        assert_eq!(config.locks.stripes, 64); // default
        assert_eq!(config.supervisor.owner, "host-a");
        assert_eq!(config.supervisor.completed_ttl_secs, Some(86400));
    }

    #[test]
    fn test_deserialize_unknown_backend_fails() {
        let toml = r#"
[store]
backend = "redis"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }
}
