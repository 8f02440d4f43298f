//! Engine configuration.

use serde::Deserialize;
use std::time::Duration;

/// Engine and async executor configuration loaded from environment variables.
///
/// Environment variables are prefixed with `CASEWORK_`:
/// - `CASEWORK_LOCK_OWNER`: Lock owner token written on claimed jobs (default: random UUID)
/// - `CASEWORK_DEFAULT_RETRIES`: Retries given to new jobs (default: 3)
/// - `CASEWORK_RETRY_WAIT_SECS`: Delay before a failed job becomes due again (default: 10)
/// - `CASEWORK_ASYNC_LOCK_SECS`: How long a claim stays valid (default: 300)
/// - `CASEWORK_MAX_JOBS_PER_ACQUISITION`: Upper bound of one acquisition round (default: 10)
/// - `CASEWORK_ACQUIRE_WAIT_MS`: Idle wait of the acquisition loop (default: 10000)
/// - `CASEWORK_TIMER_WAIT_MS`: Idle wait of the timer loop (default: 10000)
/// - `CASEWORK_RESET_EXPIRED_INTERVAL_MS`: Period of the expired-lock reset loop (default: 60000)
/// - `CASEWORK_RESET_EXPIRED_BATCH_SIZE`: Jobs reset per round (default: 3)
/// - `CASEWORK_MAX_CONCURRENT_JOBS`: Worker pool size (default: 8)
/// - `CASEWORK_TENANTS`: Comma separated tenant ids; empty runs a single tenant-agnostic loop set
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_lock_owner")]
    pub lock_owner: String,

    #[serde(default = "default_retries")]
    pub default_retries: u32,

    #[serde(default = "default_retry_wait_secs")]
    pub retry_wait_secs: u64,

    #[serde(default = "default_async_lock_secs")]
    pub async_lock_secs: u64,

    #[serde(default = "default_max_jobs_per_acquisition")]
    pub max_jobs_per_acquisition: usize,

    #[serde(default = "default_acquire_wait_ms")]
    pub acquire_wait_ms: u64,

    #[serde(default = "default_timer_wait_ms")]
    pub timer_wait_ms: u64,

    #[serde(default = "default_reset_expired_interval_ms")]
    pub reset_expired_interval_ms: u64,

    #[serde(default = "default_reset_expired_batch_size")]
    pub reset_expired_batch_size: usize,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    #[serde(default)]
    pub tenants: Vec<String>,
}

fn default_lock_owner() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_retry_wait_secs() -> u64 {
    10
}

fn default_async_lock_secs() -> u64 {
    300
}

fn default_max_jobs_per_acquisition() -> usize {
    10
}

fn default_acquire_wait_ms() -> u64 {
    10_000
}

fn default_timer_wait_ms() -> u64 {
    10_000
}

fn default_reset_expired_interval_ms() -> u64 {
    60_000
}

fn default_reset_expired_batch_size() -> usize {
    3
}

fn default_max_concurrent_jobs() -> usize {
    8
}

impl EngineConfig {
    /// Load configuration from environment variables prefixed with `CASEWORK_`.
    ///
    /// Unset variables fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("CASEWORK_").from_env::<EngineConfig>()
    }

    pub fn is_multi_tenant(&self) -> bool {
        !self.tenants.is_empty()
    }

    pub fn lock_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.async_lock_secs as i64)
    }

    pub fn retry_wait(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_wait_secs as i64)
    }

    pub fn acquire_wait(&self) -> Duration {
        Duration::from_millis(self.acquire_wait_ms)
    }

    pub fn timer_wait(&self) -> Duration {
        Duration::from_millis(self.timer_wait_ms)
    }

    pub fn reset_expired_interval(&self) -> Duration {
        Duration::from_millis(self.reset_expired_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_owner: default_lock_owner(),
            default_retries: default_retries(),
            retry_wait_secs: default_retry_wait_secs(),
            async_lock_secs: default_async_lock_secs(),
            max_jobs_per_acquisition: default_max_jobs_per_acquisition(),
            acquire_wait_ms: default_acquire_wait_ms(),
            timer_wait_ms: default_timer_wait_ms(),
            reset_expired_interval_ms: default_reset_expired_interval_ms(),
            reset_expired_batch_size: default_reset_expired_batch_size(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            tenants: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.default_retries, 3);
        assert_eq!(config.max_jobs_per_acquisition, 10);
        assert_eq!(config.acquire_wait(), Duration::from_secs(10));
        assert_eq!(config.lock_duration(), chrono::Duration::minutes(5));
        assert!(!config.is_multi_tenant());
        assert!(!config.lock_owner.is_empty());
    }

    #[test]
    fn test_lock_owner_is_unique_per_default() {
        assert_ne!(
            EngineConfig::default().lock_owner,
            EngineConfig::default().lock_owner
        );
    }
}
