//! Poll, execute and report one task per tick
//!
//! A tick is cheap: it checks the gates, takes an execution slot, polls the
//! server for at most one task and hands it to a tracked execution. The
//! execution runs the handler and reports the result, holding the slot until
//! the report finishes.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info_span, trace, warn, Instrument};

use super::metrics::WorkerMetrics;
use super::planner::ThreadAllocation;
use super::slots::{SlotGuard, TaskSlots};
use crate::client::{ServerAvailability, TaskServerClient};
use crate::config::WorkerHostConfig;
use crate::reliability::RetryPolicy;
use crate::task::{panic_message, Task, TaskHandler, TaskResult};

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Shutdown has begun; nothing was polled
    ShuttingDown,
    /// The server is out of service according to the availability gate
    ServerUnavailable,
    /// The handler asked not to receive tasks
    Paused,
    /// Every execution slot of the task type is busy
    NoCapacity,
    /// The server had no task
    NoTask,
    /// The poll call failed; the tick ends without a task
    PollFailed,
    /// A task was handed to an execution
    Dispatched { task_id: String },
}

/// How reporting a result ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The server accepted the result
    Reported { attempts: u32 },
    /// The server refused the result as invalid; not retried
    Rejected,
    /// Every attempt failed and the result was dropped
    Dropped { attempts: u32 },
}

/// Shared poll/execute/report machinery for all task types of a host
///
/// Holds the execution slots per task type, the tracker of in-flight
/// executions and the two shutdown tokens: `stop` ends scheduling, `force`
/// abandons executions that outlive the grace period.
pub struct TaskPoller {
    client: Arc<dyn TaskServerClient>,
    config: Arc<WorkerHostConfig>,
    retry: RetryPolicy,
    slots: HashMap<String, TaskSlots>,
    metrics: Arc<WorkerMetrics>,
    availability: RwLock<Option<Arc<dyn ServerAvailability>>>,
    tracker: TaskTracker,
    stop: CancellationToken,
    force: CancellationToken,
    executions: AtomicUsize,
    running: AtomicUsize,
}

impl TaskPoller {
    pub fn new(
        client: Arc<dyn TaskServerClient>,
        config: Arc<WorkerHostConfig>,
        allocation: &ThreadAllocation,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        let slots = allocation
            .iter()
            .map(|(task_type, count)| (task_type.to_string(), TaskSlots::new(count)))
            .collect();

        Self {
            client,
            retry: config.retry_policy(),
            config,
            slots,
            metrics,
            availability: RwLock::new(None),
            tracker: TaskTracker::new(),
            stop: CancellationToken::new(),
            force: CancellationToken::new(),
            executions: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
        }
    }

    /// Gate polling on server availability
    pub fn with_availability(self, availability: Arc<dyn ServerAvailability>) -> Self {
        self.set_availability(availability);
        self
    }

    /// Install or replace the availability gate; running poll loops see it
    /// on their next tick
    pub fn set_availability(&self, availability: Arc<dyn ServerAvailability>) {
        *self.availability.write() = Some(availability);
    }

    /// Run one tick for `handler`
    ///
    /// Never fails: poll errors end the tick, handler and report errors are
    /// dealt with inside the spawned execution.
    pub async fn poll_and_execute(self: &Arc<Self>, handler: &Arc<dyn TaskHandler>) -> TickOutcome {
        let task_type = handler.task_type();

        if self.stop.is_cancelled() {
            return TickOutcome::ShuttingDown;
        }

        let available = self
            .availability
            .read()
            .as_ref()
            .map_or(true, |availability| availability.is_available());
        if !available {
            debug!(task_type, "Server unavailable, skipping poll");
            return TickOutcome::ServerUnavailable;
        }

        if handler.paused() {
            debug!(task_type, "Handler paused, skipping poll");
            return TickOutcome::Paused;
        }

        let Some(slot) = self.slots.get(task_type).and_then(TaskSlots::try_acquire) else {
            trace!(task_type, "No free execution slot");
            self.metrics.no_capacity();
            return TickOutcome::NoCapacity;
        };

        let worker_id = self.worker_id_for(handler.as_ref());
        let domain = self.config.domain_for(task_type);

        self.metrics.poll();
        let polled = tokio::select! {
            _ = self.force.cancelled() => return TickOutcome::ShuttingDown,
            polled = self.client.poll_task(task_type, &worker_id, domain) => polled,
        };

        let task = match polled {
            Ok(Some(task)) => task,
            Ok(None) => {
                trace!(task_type, ?domain, "No task available");
                self.metrics.empty_poll();
                return TickOutcome::NoTask;
            }
            Err(e) => {
                warn!(task_type, ?domain, error = %e, "Poll failed");
                self.metrics.poll_error();
                return TickOutcome::PollFailed;
            }
        };

        let task_id = task.task_id.clone();
        self.dispatch(Arc::clone(handler), task, slot);
        TickOutcome::Dispatched { task_id }
    }

    /// Run the handler on `task`, turning errors and panics into FAILED results
    ///
    /// The returned result carries the worker id used for polling.
    pub async fn execute(&self, handler: &dyn TaskHandler, task: &Task) -> TaskResult {
        let outcome = AssertUnwindSafe(handler.execute(task)).catch_unwind().await;

        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(
                    task_id = %task.task_id,
                    terminal = e.terminal,
                    error = %e,
                    "Handler failed"
                );
                e.into_result(task)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(task_id = %task.task_id, panic = %message, "Handler panicked");
                TaskResult::failed(task, format!("handler panicked: {}", message))
            }
        };

        self.metrics.task_executed(result.status.is_failure());
        result.worker_id = Some(self.worker_id_for(handler));
        result
    }

    /// Send `result` to the server, retrying transient failures
    pub async fn report(&self, handler: &dyn TaskHandler, result: &TaskResult) -> ReportOutcome {
        let reported = self
            .retry
            .retry("report_result", |_| self.client.report_result(result))
            .await;

        match reported {
            Ok(((), attempts)) => {
                debug!(
                    task_id = %result.task_id,
                    status = %result.status,
                    attempts,
                    "Reported task result"
                );
                self.metrics.report_succeeded(attempts);
                ReportOutcome::Reported { attempts }
            }
            Err(failure) if !failure.exhausted => {
                error!(
                    task_id = %result.task_id,
                    error = %failure.error,
                    "Server rejected task result"
                );
                self.metrics.report_rejected();
                handler.on_report_failure(result);
                ReportOutcome::Rejected
            }
            Err(failure) => {
                error!(
                    task_id = %result.task_id,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Giving up on task result, dropping it"
                );
                self.metrics.report_dropped(failure.attempts);
                handler.on_report_failure(result);
                ReportOutcome::Dropped {
                    attempts: failure.attempts,
                }
            }
        }
    }

    /// Executions that have not finished yet; poll loops are not counted
    pub fn in_flight(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Busy execution slots for `task_type`
    pub fn busy_slots(&self, task_type: &str) -> usize {
        self.slots.get(task_type).map_or(0, TaskSlots::in_flight)
    }

    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub(crate) fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub(crate) fn force_token(&self) -> &CancellationToken {
        &self.force
    }

    /// Stop handing out slots; running executions keep theirs
    pub(crate) fn close_slots(&self) {
        for slots in self.slots.values() {
            slots.close();
        }
    }

    fn worker_id_for(&self, handler: &dyn TaskHandler) -> String {
        handler
            .identity()
            .unwrap_or_else(|| self.config.worker_id.clone())
    }

    fn dispatch(self: &Arc<Self>, handler: Arc<dyn TaskHandler>, task: Task, slot: SlotGuard) {
        let n = self.executions.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!(
            "task_execution",
            worker = %self.config.worker_name(n),
            task_type = %task.task_type,
            task_id = %task.task_id,
        );
        let poller = Arc::clone(self);

        self.running.fetch_add(1, Ordering::AcqRel);
        self.tracker.spawn(
            async move {
                let _slot = slot;
                tokio::select! {
                    _ = poller.force.cancelled() => {
                        warn!("Execution abandoned by forced shutdown, result not reported");
                    }
                    _ = async {
                        let result = poller.execute(handler.as_ref(), &task).await;
                        poller.report(handler.as_ref(), &result).await
                    } => {}
                }
                poller.running.fetch_sub(1, Ordering::AcqRel);
            }
            .instrument(span),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AvailabilityFlag, InMemoryTaskServer};
    use crate::task::{handler_fn, HandlerError, TaskResultStatus};
    use crate::worker::planner::plan_thread_allocation;
    use serde_json::json;
    use std::time::Duration;

    fn poller_for(
        server: &Arc<InMemoryTaskServer>,
        config: WorkerHostConfig,
        task_types: &[&str],
    ) -> Arc<TaskPoller> {
        let allocation = plan_thread_allocation(
            task_types.iter().copied(),
            &config.per_type_thread_count,
            config.shared_thread_count,
        )
        .unwrap();
        Arc::new(TaskPoller::new(
            server.clone(),
            Arc::new(config),
            &allocation,
            Arc::new(WorkerMetrics::new()),
        ))
    }

    fn echo() -> Arc<dyn TaskHandler> {
        Arc::new(handler_fn("echo", |task: Task| async move { Ok(task.input_data) }))
    }

    fn config() -> WorkerHostConfig {
        WorkerHostConfig::default()
            .with_worker_id("test-worker")
            .with_sleep_when_retry(Duration::from_millis(10))
    }

    async fn drain(poller: &TaskPoller) {
        poller.tracker().close();
        poller.tracker().wait().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_empty_queue_is_no_task() {
        let server = Arc::new(InMemoryTaskServer::new());
        let poller = poller_for(&server, config(), &["echo"]);

        assert_eq!(poller.poll_and_execute(&echo()).await, TickOutcome::NoTask);
        assert_eq!(server.poll_count(), 1);
        assert_eq!(poller.metrics.snapshot().empty_polls, 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_dispatch_reports_completed_result() {
        let server = Arc::new(InMemoryTaskServer::new());
        let task = Task::new("echo", json!({"msg": "hi"}));
        let task_id = task.task_id.clone();
        server.enqueue(task);
        let poller = poller_for(&server, config(), &["echo"]);

        let outcome = poller.poll_and_execute(&echo()).await;
        assert_eq!(outcome, TickOutcome::Dispatched { task_id: task_id.clone() });
        drain(&poller).await;

        let reported = server.reported();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].task_id, task_id);
        assert_eq!(reported[0].status, TaskResultStatus::Completed);
        assert_eq!(reported[0].output_data, json!({"msg": "hi"}));
        assert_eq!(reported[0].worker_id.as_deref(), Some("test-worker"));
    }

    #[test_log::test(tokio::test)]
    async fn test_poll_failure_ends_tick() {
        let server = Arc::new(InMemoryTaskServer::new());
        server.set_fail_polls(true);
        let poller = poller_for(&server, config(), &["echo"]);

        assert_eq!(poller.poll_and_execute(&echo()).await, TickOutcome::PollFailed);
        assert_eq!(poller.metrics.snapshot().poll_errors, 1);
        assert_eq!(poller.busy_slots("echo"), 0);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failed_result() {
        let server = Arc::new(InMemoryTaskServer::new());
        let poller = poller_for(&server, config(), &["flaky"]);
        let handler = handler_fn("flaky", |_task: Task| async move {
            Err::<serde_json::Value, _>(HandlerError::new("upstream timeout"))
        });
        let task = Task::new("flaky", json!({}));

        let result = poller.execute(&handler, &task).await;
        assert_eq!(result.status, TaskResultStatus::Failed);
        assert_eq!(result.reason_for_incompletion.as_deref(), Some("upstream timeout"));
        assert_eq!(poller.metrics.snapshot().handler_failures, 1);
    }

    #[tokio::test]
    async fn test_terminal_error_maps_to_terminal_status() {
        let server = Arc::new(InMemoryTaskServer::new());
        let poller = poller_for(&server, config(), &["parse"]);
        let handler = handler_fn("parse", |_task: Task| async move {
            Err::<serde_json::Value, _>(HandlerError::terminal("bad payload"))
        });

        let result = poller.execute(&handler, &Task::new("parse", json!(null))).await;
        assert_eq!(result.status, TaskResultStatus::FailedWithTerminalError);
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_failed_result() {
        let server = Arc::new(InMemoryTaskServer::new());
        let poller = poller_for(&server, config(), &["boom"]);
        let handler = handler_fn("boom", |_task: Task| async move {
            if true {
                panic!("index out of range");
            }
            Ok(json!(null))
        });

        let result = poller.execute(&handler, &Task::new("boom", json!({}))).await;
        assert_eq!(result.status, TaskResultStatus::Failed);
        assert_eq!(
            result.reason_for_incompletion.as_deref(),
            Some("handler panicked: index out of range")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_retries_then_succeeds() {
        let server = Arc::new(InMemoryTaskServer::new());
        server.fail_next_reports(3);
        let poller = poller_for(&server, config().with_update_retry_count(3), &["echo"]);
        let result = TaskResult::completed(&Task::new("echo", json!({})), json!(1));

        let outcome = poller.report(echo().as_ref(), &result).await;
        assert_eq!(outcome, ReportOutcome::Reported { attempts: 4 });
        assert_eq!(server.report_attempts(), 4);
        assert_eq!(server.reported().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_dropped_after_exhaustion() {
        let server = Arc::new(InMemoryTaskServer::new());
        server.fail_next_reports(10);
        let poller = poller_for(&server, config().with_update_retry_count(2), &["echo"]);
        let result = TaskResult::completed(&Task::new("echo", json!({})), json!(1));

        let outcome = poller.report(echo().as_ref(), &result).await;
        assert_eq!(outcome, ReportOutcome::Dropped { attempts: 3 });
        assert!(server.reported().is_empty());
        assert_eq!(poller.metrics.snapshot().reports_dropped, 1);
    }

    #[tokio::test]
    async fn test_rejected_report_not_retried() {
        let server = Arc::new(InMemoryTaskServer::new());
        server.set_reject_reports(true);
        let poller = poller_for(&server, config(), &["echo"]);
        let result = TaskResult::completed(&Task::new("echo", json!({})), json!(1));

        let outcome = poller.report(echo().as_ref(), &result).await;
        assert_eq!(outcome, ReportOutcome::Rejected);
        assert_eq!(server.report_attempts(), 1);
    }

    #[tokio::test]
    async fn test_no_capacity_skips_poll() {
        let server = Arc::new(InMemoryTaskServer::new());
        // Two task types sharing one slot: each gets zero
        let poller = poller_for(&server, config().with_shared_thread_count(1), &["echo", "other"]);

        assert_eq!(poller.poll_and_execute(&echo()).await, TickOutcome::NoCapacity);
        assert_eq!(server.poll_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_server_skips_poll() {
        let server = Arc::new(InMemoryTaskServer::new());
        let flag = Arc::new(AvailabilityFlag::new(false));
        let allocation = plan_thread_allocation(["echo"], &HashMap::new(), None).unwrap();
        let poller = Arc::new(
            TaskPoller::new(
                server.clone(),
                Arc::new(config()),
                &allocation,
                Arc::new(WorkerMetrics::new()),
            )
            .with_availability(flag.clone()),
        );

        assert_eq!(poller.poll_and_execute(&echo()).await, TickOutcome::ServerUnavailable);
        flag.set(true);
        assert_eq!(poller.poll_and_execute(&echo()).await, TickOutcome::NoTask);
        assert_eq!(server.poll_count(), 1);
    }

    #[tokio::test]
    async fn test_stopped_poller_does_not_poll() {
        let server = Arc::new(InMemoryTaskServer::new());
        let poller = poller_for(&server, config(), &["echo"]);
        poller.stop_token().cancel();

        assert_eq!(poller.poll_and_execute(&echo()).await, TickOutcome::ShuttingDown);
        assert_eq!(server.poll_count(), 0);
    }

    #[tokio::test]
    async fn test_polls_configured_domain_with_identity() {
        struct Canary;

        #[async_trait::async_trait]
        impl TaskHandler for Canary {
            fn task_type(&self) -> &str {
                "encode"
            }

            fn identity(&self) -> Option<String> {
                Some("encoder-7".to_string())
            }

            async fn execute(&self, task: &Task) -> Result<TaskResult, HandlerError> {
                Ok(TaskResult::completed(task, json!(null)))
            }
        }

        let server = Arc::new(InMemoryTaskServer::new());
        let poller = poller_for(&server, config().with_domain("encode", "canary"), &["encode"]);
        let handler: Arc<dyn TaskHandler> = Arc::new(Canary);

        poller.poll_and_execute(&handler).await;

        let polls = server.polls();
        assert_eq!(polls[0].domain.as_deref(), Some("canary"));
        assert_eq!(polls[0].worker_id, "encoder-7");
    }
}
