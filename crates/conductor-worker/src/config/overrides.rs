//! Per-task-type worker overrides
//!
//! Overrides come from two places: the registration of a handler and an
//! external [`WorkerConfiguration`] source. The external source wins.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Overrides attached to a single handler registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOverrides {
    /// Execution slots for the task type (default: 1)
    pub thread_count: Option<usize>,

    /// Polling interval (default: the handler's own)
    #[serde(default, with = "super::option_duration_millis")]
    pub polling_interval: Option<Duration>,

    /// Domain to poll (default: global queue)
    pub domain: Option<String>,
}

impl WorkerOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_count(mut self, count: usize) -> Self {
        self.thread_count = Some(count);
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = Some(interval);
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Fill unset fields from `other`
    pub fn or(self, other: &WorkerOverrides) -> Self {
        Self {
            thread_count: self.thread_count.or(other.thread_count),
            polling_interval: self.polling_interval.or(other.polling_interval),
            domain: self.domain.or_else(|| other.domain.clone()),
        }
    }
}

/// External source of per-task-type overrides
pub trait WorkerConfiguration: Send + Sync {
    fn thread_count(&self, task_type: &str) -> Option<usize>;

    fn polling_interval(&self, task_type: &str) -> Option<Duration>;

    fn domain(&self, task_type: &str) -> Option<String>;

    /// All overrides this source has for `task_type`
    fn overrides_for(&self, task_type: &str) -> WorkerOverrides {
        WorkerOverrides {
            thread_count: self.thread_count(task_type),
            polling_interval: self.polling_interval(task_type),
            domain: self.domain(task_type),
        }
    }
}

/// Property key holding defaults for every task type
pub const ALL_WORKERS: &str = "all";

/// Overrides read from flat `worker.<taskType>.<property>` properties
///
/// Recognised properties are `thread_count`, `polling_interval` (milliseconds)
/// and `domain`. A `worker.all.<property>` entry applies to every task type
/// without its own value. Unparseable or empty values are ignored.
///
/// ```
/// use conductor_worker::config::{PropertyWorkerConfiguration, WorkerConfiguration};
///
/// let config = PropertyWorkerConfiguration::from_pairs([
///     ("worker.encode.thread_count", "4"),
///     ("worker.all.domain", "canary"),
/// ]);
/// assert_eq!(config.thread_count("encode"), Some(4));
/// assert_eq!(config.domain("notify").as_deref(), Some("canary"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct PropertyWorkerConfiguration {
    properties: HashMap<String, String>,
}

impl PropertyWorkerConfiguration {
    pub fn new(properties: HashMap<String, String>) -> Self {
        Self { properties }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    fn property(&self, task_type: &str, name: &str) -> Option<&str> {
        [task_type, ALL_WORKERS]
            .iter()
            .filter_map(|scope| self.properties.get(&format!("worker.{}.{}", scope, name)))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }
}

impl WorkerConfiguration for PropertyWorkerConfiguration {
    fn thread_count(&self, task_type: &str) -> Option<usize> {
        self.property(task_type, "thread_count")?.parse().ok()
    }

    fn polling_interval(&self, task_type: &str) -> Option<Duration> {
        self.property(task_type, "polling_interval")?
            .parse()
            .ok()
            .map(Duration::from_millis)
    }

    fn domain(&self, task_type: &str) -> Option<String> {
        self.property(task_type, "domain").map(str::to_string)
    }
}
