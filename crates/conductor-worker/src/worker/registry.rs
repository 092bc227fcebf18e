//! Explicit handler registration
//!
//! The host application registers each handler with optional overrides, then
//! turns the registry into a [`WorkerHost`]. Nothing is shared between
//! registries.

use std::sync::Arc;

use tracing::{debug, warn};

use super::host::WorkerHost;
use crate::client::TaskServerClient;
use crate::config::{ConfigError, WorkerConfiguration, WorkerHostConfig, WorkerOverrides};
use crate::task::{PollingIntervalOverride, TaskHandler};

struct Registration {
    handler: Arc<dyn TaskHandler>,
    overrides: WorkerOverrides,
}

/// Caller-owned table of handlers and their per-task-type overrides
///
/// Override precedence for a task type, highest first:
/// 1. the external [`WorkerConfiguration`], when one is attached
/// 2. the overrides given at registration
/// 3. the handler's own defaults (one slot, its polling interval, no domain)
///
/// Entries already present in the base [`WorkerHostConfig`] passed to
/// [`WorkerRegistry::into_host`] are kept as they are.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use conductor_worker::prelude::*;
///
/// let mut registry = WorkerRegistry::new();
/// registry
///     .register(
///         Arc::new(handler_fn("encode", |task: Task| async move { Ok(task.input_data) })),
///         WorkerOverrides::new().with_thread_count(4).with_domain("canary"),
///     )
///     .register_handler(Arc::new(handler_fn("notify", |_task: Task| async move {
///         Ok(serde_json::json!({"sent": true}))
///     })));
///
/// let host = registry
///     .into_host(Arc::new(InMemoryTaskServer::new()), WorkerHostConfig::default())
///     .unwrap();
/// assert_eq!(host.thread_allocation().get("encode"), 4);
/// assert_eq!(host.config().domain_for("encode"), Some("canary"));
/// ```
#[derive(Default)]
pub struct WorkerRegistry {
    registrations: Vec<Registration>,
    configuration: Option<Arc<dyn WorkerConfiguration>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consult `configuration` before the registration overrides
    pub fn with_configuration(mut self, configuration: Arc<dyn WorkerConfiguration>) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// Register `handler`; replaces an earlier registration of the same task type
    pub fn register(
        &mut self,
        handler: Arc<dyn TaskHandler>,
        overrides: WorkerOverrides,
    ) -> &mut Self {
        let registration = Registration { handler, overrides };
        let task_type = registration.handler.task_type();

        match self
            .registrations
            .iter_mut()
            .find(|r| r.handler.task_type() == task_type)
        {
            Some(existing) => {
                warn!(task_type, "Task type registered twice, keeping the latest");
                *existing = registration;
            }
            None => {
                debug!(task_type, "Registered handler");
                self.registrations.push(registration);
            }
        }
        self
    }

    /// Register `handler` without overrides
    pub fn register_handler(&mut self, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.register(handler, WorkerOverrides::default())
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn task_types(&self) -> Vec<&str> {
        self.registrations
            .iter()
            .map(|r| r.handler.task_type())
            .collect()
    }

    /// Resolved overrides for `task_type`, if it is registered
    pub fn overrides_for(&self, task_type: &str) -> Option<WorkerOverrides> {
        self.registrations
            .iter()
            .find(|r| r.handler.task_type() == task_type)
            .map(|r| self.resolve(r))
    }

    /// Build a host from the registered handlers
    ///
    /// Every task type gets an explicit thread count (default 1) unless
    /// `base` uses a shared pool, in which case only explicitly configured
    /// counts are added and the host build rejects the mix.
    pub fn into_host(
        self,
        client: Arc<dyn TaskServerClient>,
        mut base: WorkerHostConfig,
    ) -> Result<WorkerHost, ConfigError> {
        let shared_pool = base.shared_thread_count.is_some();
        let mut handlers = Vec::with_capacity(self.registrations.len());

        for registration in &self.registrations {
            let overrides = self.resolve(registration);
            let task_type = registration.handler.task_type().to_string();

            match (overrides.thread_count, shared_pool) {
                (Some(count), _) => {
                    base.per_type_thread_count.entry(task_type.clone()).or_insert(count);
                }
                (None, false) => {
                    base.per_type_thread_count.entry(task_type.clone()).or_insert(1);
                }
                (None, true) => {}
            }

            if let Some(domain) = overrides.domain.filter(|d| !d.is_empty()) {
                base.task_to_domain.entry(task_type).or_insert(domain);
            }

            let handler = match overrides.polling_interval {
                Some(interval) => {
                    PollingIntervalOverride::wrap(Arc::clone(&registration.handler), interval)
                }
                None => Arc::clone(&registration.handler),
            };
            handlers.push(handler);
        }

        WorkerHost::build(client, handlers, base)
    }

    fn resolve(&self, registration: &Registration) -> WorkerOverrides {
        match &self.configuration {
            Some(configuration) => configuration
                .overrides_for(registration.handler.task_type())
                .or(&registration.overrides),
            None => registration.overrides.clone(),
        }
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("task_types", &self.task_types())
            .field("has_configuration", &self.configuration.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryTaskServer;
    use crate::config::PropertyWorkerConfiguration;
    use crate::task::{handler_fn, Task};
    use std::time::Duration;

    fn handler(task_type: &str) -> Arc<dyn TaskHandler> {
        Arc::new(handler_fn(task_type, |task: Task| async move { Ok(task.input_data) }))
    }

    fn server() -> Arc<dyn TaskServerClient> {
        Arc::new(InMemoryTaskServer::new())
    }

    #[test]
    fn test_every_type_gets_explicit_thread_count() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(handler("encode"), WorkerOverrides::new().with_thread_count(3))
            .register_handler(handler("notify"));

        let host = registry.into_host(server(), WorkerHostConfig::default()).unwrap();
        let allocation = host.thread_allocation();
        assert_eq!(allocation.get("encode"), 3);
        assert_eq!(allocation.get("notify"), 1);
        assert!(allocation.defaulted().is_empty());
        assert_eq!(host.config().per_type_thread_count.len(), 2);
    }

    #[test]
    fn test_external_configuration_wins() {
        let properties = PropertyWorkerConfiguration::from_pairs([
            ("worker.encode.thread_count", "5"),
            ("worker.all.polling_interval", "250"),
        ]);
        let mut registry =
            WorkerRegistry::new().with_configuration(Arc::new(properties));
        registry.register(
            handler("encode"),
            WorkerOverrides::new()
                .with_thread_count(2)
                .with_domain("blue"),
        );

        let overrides = registry.overrides_for("encode").unwrap();
        assert_eq!(overrides.thread_count, Some(5));
        assert_eq!(overrides.polling_interval, Some(Duration::from_millis(250)));
        assert_eq!(overrides.domain.as_deref(), Some("blue"));

        let host = registry.into_host(server(), WorkerHostConfig::default()).unwrap();
        assert_eq!(host.thread_allocation().get("encode"), 5);
        assert_eq!(host.config().domain_for("encode"), Some("blue"));
    }

    #[test]
    fn test_base_config_domain_kept() {
        let mut registry = WorkerRegistry::new();
        registry.register(handler("encode"), WorkerOverrides::new().with_domain("blue"));

        let base = WorkerHostConfig::default().with_domain("encode", "green");
        let host = registry.into_host(server(), base).unwrap();
        assert_eq!(host.config().domain_for("encode"), Some("green"));
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(handler("encode"), WorkerOverrides::new().with_thread_count(8))
            .register(handler("encode"), WorkerOverrides::new().with_thread_count(2));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.overrides_for("encode").unwrap().thread_count, Some(2));
    }

    #[test]
    fn test_shared_pool_base_config() {
        let mut registry = WorkerRegistry::new();
        registry
            .register_handler(handler("a"))
            .register_handler(handler("b"));

        let host = registry
            .into_host(server(), WorkerHostConfig::default().with_shared_thread_count(4))
            .unwrap();
        assert_eq!(host.thread_allocation().get("a"), 2);
    }

    #[test]
    fn test_shared_pool_with_explicit_count_conflicts() {
        let mut registry = WorkerRegistry::new();
        registry.register(handler("a"), WorkerOverrides::new().with_thread_count(2));

        let err = registry
            .into_host(server(), WorkerHostConfig::default().with_shared_thread_count(4))
            .unwrap_err();
        assert_eq!(err, ConfigError::ConflictingThreadAllocation);
    }

    #[test]
    fn test_polling_interval_override_applied() {
        let mut registry = WorkerRegistry::new();
        registry.register(
            handler("encode"),
            WorkerOverrides::new().with_polling_interval(Duration::from_millis(40)),
        );

        let host = registry.into_host(server(), WorkerHostConfig::default()).unwrap();
        assert_eq!(host.task_types(), vec!["encode"]);
    }

    #[test]
    fn test_empty_registry() {
        let registry = WorkerRegistry::new();
        assert!(registry.is_empty());

        let host = registry.into_host(server(), WorkerHostConfig::default()).unwrap();
        assert!(host.thread_allocation().is_empty());
    }
}
