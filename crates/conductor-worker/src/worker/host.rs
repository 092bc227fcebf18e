//! Worker host lifecycle
//!
//! Owns the handlers, schedules one fixed-delay poll loop per task type and
//! drains in-flight executions on shutdown.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

use super::metrics::{MetricsSnapshot, WorkerMetrics};
use super::planner::{plan_thread_allocation, ThreadAllocation};
use super::poller::{TaskPoller, TickOutcome};
use crate::client::{ServerAvailability, TaskServerClient};
use crate::config::{ConfigError, WorkerHostConfig};
use crate::task::TaskHandler;

/// Worker host status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    /// Built and validated, nothing scheduled yet
    Created,
    /// Poll loops are scheduled
    Running,
    /// Draining in-flight executions
    ShuttingDown,
    /// Shut down; cannot be started again
    Stopped,
}

/// Lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// `init` was called outside a tokio runtime
    #[error("worker host must be started from within a tokio runtime")]
    NoRuntime,

    #[error("worker host is already started")]
    AlreadyStarted,

    #[error("worker host is stopped")]
    Stopped,
}

/// How a shutdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ShutdownOutcome {
    /// The host was not running; nothing to do
    NotRunning,
    /// Every in-flight execution finished within the grace period
    Drained,
    /// The grace period elapsed; `abandoned` executions were cancelled
    /// without reporting their results
    Forced { abandoned: usize },
}

/// Worker host for a set of task handlers
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use conductor_worker::prelude::*;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Arc::new(InMemoryTaskServer::new());
/// let echo = handler_fn("echo", |task: Task| async move { Ok(task.input_data) });
///
/// let host = WorkerHost::build(
///     server,
///     vec![Arc::new(echo) as Arc<dyn TaskHandler>],
///     WorkerHostConfig::default(),
/// )?;
/// host.init()?;
///
/// // ... later, graceful shutdown
/// host.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct WorkerHost {
    config: Arc<WorkerHostConfig>,
    handlers: Vec<Arc<dyn TaskHandler>>,
    allocation: ThreadAllocation,
    metrics: Arc<WorkerMetrics>,
    poller: Arc<TaskPoller>,
    status: Mutex<HostStatus>,
}

impl WorkerHost {
    /// Validate `config` against `handlers` and build a host
    ///
    /// Pure: nothing is polled or spawned until [`WorkerHost::init`]. When two
    /// handlers share a task type the later one wins.
    pub fn build<I>(
        client: Arc<dyn TaskServerClient>,
        handlers: I,
        config: WorkerHostConfig,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = Arc<dyn TaskHandler>>,
    {
        config.validate()?;

        let mut unique: Vec<Arc<dyn TaskHandler>> = Vec::new();
        for handler in handlers {
            if handler.polling_interval().is_zero() {
                return Err(ConfigError::InvalidPollingInterval(
                    handler.task_type().to_string(),
                ));
            }
            match unique
                .iter_mut()
                .find(|h| h.task_type() == handler.task_type())
            {
                Some(existing) => {
                    warn!(
                        task_type = handler.task_type(),
                        "Duplicate handler for task type, replacing the earlier one"
                    );
                    *existing = handler;
                }
                None => unique.push(handler),
            }
        }

        let allocation = plan_thread_allocation(
            unique.iter().map(|h| h.task_type()),
            &config.per_type_thread_count,
            config.shared_thread_count,
        )?;
        for task_type in allocation.starved() {
            warn!(task_type, "Task type has no execution slots and will never be polled");
        }

        let config = Arc::new(config);
        let metrics = Arc::new(WorkerMetrics::new());
        let poller = Arc::new(TaskPoller::new(
            client,
            Arc::clone(&config),
            &allocation,
            Arc::clone(&metrics),
        ));

        Ok(Self {
            config,
            handlers: unique,
            allocation,
            metrics,
            poller,
            status: Mutex::new(HostStatus::Created),
        })
    }

    /// Skip polling while `availability` reports the server out of service
    ///
    /// Replaces any earlier gate. Poll loops that are already running pick it
    /// up on their next tick.
    pub fn with_availability(self, availability: Arc<dyn ServerAvailability>) -> Self {
        self.poller.set_availability(availability);
        self
    }

    /// Schedule a fixed-delay poll loop for every handler and return
    ///
    /// Only valid once, from [`HostStatus::Created`].
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub fn init(&self) -> Result<(), HostError> {
        let runtime = Handle::try_current().map_err(|_| HostError::NoRuntime)?;

        let mut status = self.status.lock();
        match *status {
            HostStatus::Created => {}
            HostStatus::Running | HostStatus::ShuttingDown => {
                return Err(HostError::AlreadyStarted)
            }
            HostStatus::Stopped => return Err(HostError::Stopped),
        }

        info!(
            worker_id = %self.config.worker_id,
            task_types = ?self.task_types(),
            allocation = ?self.allocation,
            "Starting worker host"
        );

        for handler in &self.handlers {
            self.poller.tracker().spawn_on(
                poll_loop(Arc::clone(&self.poller), Arc::clone(handler)),
                &runtime,
            );
        }

        *status = HostStatus::Running;
        Ok(())
    }

    /// Stop polling and wait up to the grace period for in-flight executions
    ///
    /// Executions still running when the grace period ends are cancelled and
    /// their results are never reported. A no-op unless the host is running,
    /// so concurrent or repeated calls are harmless: only the first drains.
    ///
    /// Dropping the returned future before it completes cancels the remaining
    /// executions at once and leaves the host stopped.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> ShutdownOutcome {
        {
            let mut status = self.status.lock();
            if *status != HostStatus::Running {
                debug!(status = ?*status, "Shutdown requested while not running");
                return ShutdownOutcome::NotRunning;
            }
            *status = HostStatus::ShuttingDown;
        }
        let _abort = AbortOnDrop { host: self };

        let grace = self.config.shutdown_grace_period;
        info!(
            worker_id = %self.config.worker_id,
            in_flight = self.poller.in_flight(),
            grace_period_secs = grace.as_secs(),
            "Initiating graceful shutdown"
        );

        self.poller.stop_token().cancel();
        self.poller.close_slots();
        let tracker = self.poller.tracker();
        tracker.close();

        let outcome = match tokio::time::timeout(grace, tracker.wait()).await {
            Ok(()) => {
                debug!("All executions completed");
                ShutdownOutcome::Drained
            }
            Err(_) => {
                let abandoned = self.poller.in_flight();
                warn!(
                    abandoned,
                    "Shutdown grace period elapsed, cancelling remaining executions"
                );
                self.poller.force_token().cancel();
                ShutdownOutcome::Forced { abandoned }
            }
        };

        *self.status.lock() = HostStatus::Stopped;
        info!(worker_id = %self.config.worker_id, ?outcome, "Worker host stopped");
        outcome
    }

    pub fn status(&self) -> HostStatus {
        *self.status.lock()
    }

    pub fn thread_allocation(&self) -> &ThreadAllocation {
        &self.allocation
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn config(&self) -> &WorkerHostConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Registered task types, in registration order
    pub fn task_types(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.task_type()).collect()
    }

    /// Executions that have not finished
    pub fn in_flight(&self) -> usize {
        self.poller.in_flight()
    }
}

impl Drop for WorkerHost {
    fn drop(&mut self) {
        // Poll loops hold the poller, not the host
        self.poller.stop_token().cancel();
    }
}

/// Finishes a shutdown whose future was dropped mid-drain
struct AbortOnDrop<'a> {
    host: &'a WorkerHost,
}

impl Drop for AbortOnDrop<'_> {
    fn drop(&mut self) {
        let mut status = self.host.status.lock();
        if *status == HostStatus::ShuttingDown {
            warn!(
                in_flight = self.host.poller.in_flight(),
                "Shutdown abandoned before draining, cancelling remaining executions"
            );
            self.host.poller.force_token().cancel();
            *status = HostStatus::Stopped;
        }
    }
}

impl std::fmt::Debug for WorkerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHost")
            .field("worker_id", &self.config.worker_id)
            .field("task_types", &self.task_types())
            .field("status", &self.status())
            .finish()
    }
}

/// Fixed-delay loop: wait one interval, tick, repeat until stopped
async fn poll_loop(poller: Arc<TaskPoller>, handler: Arc<dyn TaskHandler>) {
    let interval: Duration = handler.polling_interval();
    let stop = poller.stop_token().clone();

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if poller.poll_and_execute(&handler).await == TickOutcome::ShuttingDown {
            break;
        }
    }

    debug!(task_type = handler.task_type(), "Poll loop exited");
}
