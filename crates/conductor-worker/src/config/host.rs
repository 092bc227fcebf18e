//! Worker host configuration

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reliability::RetryPolicy;

/// Default worker name pattern; `%d` is replaced by the execution number
pub const DEFAULT_WORKER_NAME_PREFIX: &str = "workflow-worker-%d";

/// Configuration errors, raised when a host is built
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Shared pool and per-type thread counts were both supplied
    #[error("invalid worker thread count specified, use either shared thread pool or config thread count per task")]
    ConflictingThreadAllocation,

    #[error("thread count for task type {task_type} must be at least 1, got {count}")]
    InvalidThreadCount { task_type: String, count: usize },

    #[error("shared thread count must be at least 1, got {0}")]
    InvalidSharedThreadCount(usize),

    #[error("thread count {count} exceeds the maximum of {max}")]
    ThreadCountTooLarge { count: usize, max: usize },

    #[error("shutdown grace period must be at least 1 second, got {0:?}")]
    InvalidGracePeriod(Duration),

    #[error("polling interval for task type {0} must be greater than zero")]
    InvalidPollingInterval(String),

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        key: String,
        value: String,
        reason: String,
    },
}

/// Worker host configuration
///
/// Immutable once handed to [`WorkerHost::build`](crate::WorkerHost::build),
/// which validates it.
///
/// # Example
///
/// ```
/// use conductor_worker::WorkerHostConfig;
/// use std::time::Duration;
///
/// let config = WorkerHostConfig::default()
///     .with_thread_count_for("encode_video", 4)
///     .with_domain("encode_video", "canary")
///     .with_update_retry_count(5)
///     .with_shutdown_grace_period(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerHostConfig {
    /// Id sent to the server with every poll
    pub worker_id: String,

    /// Shared execution slots, split evenly across task types
    pub shared_thread_count: Option<usize>,

    /// Execution slots per task type; exclusive with `shared_thread_count`
    pub per_type_thread_count: HashMap<String, usize>,

    /// Delay between report attempts
    #[serde(with = "super::duration_millis")]
    pub sleep_when_retry: Duration,

    /// Report attempts after the first failure
    pub update_retry_count: u32,

    /// How long shutdown waits for in-flight executions
    #[serde(with = "super::duration_secs")]
    pub shutdown_grace_period: Duration,

    /// Queue partition polled per task type
    pub task_to_domain: HashMap<String, String>,

    /// Pattern for execution names in logs
    pub worker_name_prefix: String,
}

impl Default for WorkerHostConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            shared_thread_count: None,
            per_type_thread_count: HashMap::new(),
            sleep_when_retry: retry.sleep_when_retry,
            update_retry_count: retry.update_retry_count,
            shutdown_grace_period: Duration::from_secs(10),
            task_to_domain: HashMap::new(),
            worker_name_prefix: DEFAULT_WORKER_NAME_PREFIX.to_string(),
        }
    }
}

impl WorkerHostConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WORKER_ID`: Worker id (default: `worker-<uuid>`)
    /// - `WORKER_THREAD_COUNT`: Shared execution slots
    /// - `WORKER_TASK_THREAD_COUNT`: Per-type slots, e.g. `encode=4,notify=1`
    /// - `WORKER_SLEEP_WHEN_RETRY_MS`: Delay between report attempts (default: 500)
    /// - `WORKER_UPDATE_RETRY_COUNT`: Report retries (default: 3)
    /// - `WORKER_SHUTDOWN_GRACE_PERIOD_SECS`: Shutdown drain time (default: 10)
    /// - `WORKER_TASK_TO_DOMAIN`: Domains, e.g. `encode=canary`
    /// - `WORKER_NAME_PREFIX`: Execution name pattern
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(id) = lookup("WORKER_ID") {
            config.worker_id = id;
        }
        if let Some(value) = lookup("WORKER_THREAD_COUNT") {
            config.shared_thread_count = Some(parse_value("WORKER_THREAD_COUNT", &value)?);
        }
        if let Some(value) = lookup("WORKER_TASK_THREAD_COUNT") {
            config.per_type_thread_count = parse_pairs("WORKER_TASK_THREAD_COUNT", &value)?
                .into_iter()
                .map(|(k, v)| parse_value("WORKER_TASK_THREAD_COUNT", &v).map(|n| (k, n)))
                .collect::<Result<_, _>>()?;
        }
        if let Some(value) = lookup("WORKER_SLEEP_WHEN_RETRY_MS") {
            config.sleep_when_retry =
                Duration::from_millis(parse_value("WORKER_SLEEP_WHEN_RETRY_MS", &value)?);
        }
        if let Some(value) = lookup("WORKER_UPDATE_RETRY_COUNT") {
            config.update_retry_count = parse_value("WORKER_UPDATE_RETRY_COUNT", &value)?;
        }
        if let Some(value) = lookup("WORKER_SHUTDOWN_GRACE_PERIOD_SECS") {
            config.shutdown_grace_period =
                Duration::from_secs(parse_value("WORKER_SHUTDOWN_GRACE_PERIOD_SECS", &value)?);
        }
        if let Some(value) = lookup("WORKER_TASK_TO_DOMAIN") {
            config.task_to_domain = parse_pairs("WORKER_TASK_TO_DOMAIN", &value)?;
        }
        if let Some(prefix) = lookup("WORKER_NAME_PREFIX") {
            config.worker_name_prefix = prefix;
        }

        Ok(config)
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Use a shared pool of `count` slots split across task types
    pub fn with_shared_thread_count(mut self, count: usize) -> Self {
        self.shared_thread_count = Some(count);
        self
    }

    pub fn with_task_thread_count(mut self, counts: HashMap<String, usize>) -> Self {
        self.per_type_thread_count = counts;
        self
    }

    pub fn with_thread_count_for(mut self, task_type: impl Into<String>, count: usize) -> Self {
        self.per_type_thread_count.insert(task_type.into(), count);
        self
    }

    pub fn with_sleep_when_retry(mut self, sleep: Duration) -> Self {
        self.sleep_when_retry = sleep;
        self
    }

    pub fn with_update_retry_count(mut self, count: u32) -> Self {
        self.update_retry_count = count;
        self
    }

    pub fn with_shutdown_grace_period(mut self, period: Duration) -> Self {
        self.shutdown_grace_period = period;
        self
    }

    pub fn with_task_to_domain(mut self, domains: HashMap<String, String>) -> Self {
        self.task_to_domain = domains;
        self
    }

    pub fn with_domain(mut self, task_type: impl Into<String>, domain: impl Into<String>) -> Self {
        self.task_to_domain.insert(task_type.into(), domain.into());
        self
    }

    pub fn with_worker_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_name_prefix = prefix.into();
        self
    }

    /// Retry policy for the report step
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.update_retry_count, self.sleep_when_retry)
    }

    /// Domain polled for `task_type`, if any
    pub fn domain_for(&self, task_type: &str) -> Option<&str> {
        self.task_to_domain
            .get(task_type)
            .map(String::as_str)
            .filter(|d| !d.is_empty())
    }

    /// Name of the `n`th execution, derived from `worker_name_prefix`
    pub fn worker_name(&self, n: usize) -> String {
        if self.worker_name_prefix.contains("%d") {
            self.worker_name_prefix.replace("%d", &n.to_string())
        } else {
            format!("{}{}", self.worker_name_prefix, n)
        }
    }

    /// Validate settings that do not depend on the registered handlers
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shutdown_grace_period < Duration::from_secs(1) {
            return Err(ConfigError::InvalidGracePeriod(self.shutdown_grace_period));
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Parse `a=1,b=2` into a map
fn parse_pairs(key: &str, value: &str) -> Result<HashMap<String, String>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => {
                Ok((k.trim().to_string(), v.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidEnv {
                key: key.to_string(),
                value: value.to_string(),
                reason: format!("expected name=value, got {:?}", entry),
            }),
        })
        .collect()
}
