//! Tunables read from the configuration file

use std::time::Duration;

use crate::storage::state::DeploymentState;

pub const KEY_HEALTH_TIMEOUT_CORE: &str = "HEALTH_TIMEOUT_CORE";
pub const KEY_HEALTH_TIMEOUT_MODULE: &str = "HEALTH_TIMEOUT_MODULE";
pub const KEY_HEALTH_TIMEOUT_INFRA: &str = "HEALTH_TIMEOUT_INFRA";
pub const KEY_HEALTH_POLL_INTERVAL: &str = "HEALTH_POLL_INTERVAL";
pub const KEY_BACKUP_RETENTION: &str = "BACKUP_RETENTION";
pub const KEY_CORE_INTERNAL_URL: &str = "CORE_INTERNAL_URL";
pub const KEY_RELEASE_URL: &str = "RELEASE_URL";

pub const DEFAULT_CORE_URL: &str = "http://127.0.0.1:8000";

/// Health budgets, retention and remote endpoints for one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Budget for the base service
    pub core_timeout: Duration,

    /// Budget for each module
    pub module_timeout: Duration,

    /// Budget for each infrastructure service
    pub infra_timeout: Duration,

    /// Interval between health polls
    pub poll_interval: Duration,

    /// Backups kept by post-commit cleanup
    pub backup_retention: usize,

    /// Base service URL reachable from the host
    pub core_url: String,

    /// Release host, if configured
    pub release_url: Option<String>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            core_timeout: Duration::from_secs(180),
            module_timeout: Duration::from_secs(90),
            infra_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            backup_retention: 5,
            core_url: DEFAULT_CORE_URL.to_string(),
            release_url: None,
        }
    }
}

impl OrchestratorOptions {
    /// Defaults overridden by configuration keys
    pub fn from_state(state: &DeploymentState) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| Duration::from_secs(state.get_u64(key, default.as_secs()));

        Self {
            core_timeout: secs(KEY_HEALTH_TIMEOUT_CORE, defaults.core_timeout),
            module_timeout: secs(KEY_HEALTH_TIMEOUT_MODULE, defaults.module_timeout),
            infra_timeout: secs(KEY_HEALTH_TIMEOUT_INFRA, defaults.infra_timeout),
            poll_interval: secs(KEY_HEALTH_POLL_INTERVAL, defaults.poll_interval).max(Duration::from_secs(1)),
            backup_retention: state.get_u64(KEY_BACKUP_RETENTION, defaults.backup_retention as u64) as usize,
            core_url: state
                .get(KEY_CORE_INTERNAL_URL)
                .map(|s| s.to_string())
                .unwrap_or(defaults.core_url),
            release_url: state.get(KEY_RELEASE_URL).map(|s| s.to_string()),
        }
    }
}
