//! Task handler trait and closure adapters

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::model::{Task, TaskResult};

/// Polling interval used when a handler does not specify one
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(1000);

/// Error raised by a handler while processing a task
///
/// Converted by the poller into a FAILED task result. Terminal errors map to
/// `FAILED_WITH_TERMINAL_ERROR`, which tells the server not to retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,

    /// Whether the server should give up on the task
    pub terminal: bool,
}

impl HandlerError {
    /// Create an error the server may retry
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            terminal: false,
        }
    }

    /// Create an error the server must not retry
    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            terminal: true,
        }
    }

    /// Build the FAILED result for `task`
    pub fn into_result(self, task: &Task) -> TaskResult {
        if self.terminal {
            TaskResult::failed_with_terminal_error(task, self.message)
        } else {
            TaskResult::failed(task, self.message)
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::terminal(format!("invalid task payload: {}", err))
    }
}

/// Application logic bound to one task type
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// #[async_trait]
/// impl TaskHandler for Echo {
///     fn task_type(&self) -> &str {
///         "echo"
///     }
///
///     async fn execute(&self, task: &Task) -> Result<TaskResult, HandlerError> {
///         Ok(TaskResult::completed(task, task.input_data.clone()))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Task type this handler processes
    fn task_type(&self) -> &str;

    /// Delay between the end of one poll tick and the start of the next
    fn polling_interval(&self) -> Duration {
        DEFAULT_POLLING_INTERVAL
    }

    /// Paused handlers skip their poll ticks
    fn paused(&self) -> bool {
        false
    }

    /// Worker id sent with polls; the host's worker id when `None`
    fn identity(&self) -> Option<String> {
        None
    }

    /// Process one task
    async fn execute(&self, task: &Task) -> Result<TaskResult, HandlerError>;

    /// Called when a result could not be delivered to the server
    fn on_report_failure(&self, _result: &TaskResult) {}
}

/// Handler built from an async closure returning the task output
pub struct FnHandler<F> {
    task_type: String,
    polling_interval: Duration,
    f: F,
}

/// Create a handler from an async closure
///
/// ```ignore
/// let echo = handler_fn("echo", |task: Task| async move { Ok(task.input_data) });
/// ```
pub fn handler_fn<F, Fut>(task_type: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
{
    FnHandler {
        task_type: task_type.into(),
        polling_interval: DEFAULT_POLLING_INTERVAL,
        f,
    }
}

impl<F> FnHandler<F> {
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
{
    fn task_type(&self) -> &str {
        &self.task_type
    }

    fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    async fn execute(&self, task: &Task) -> Result<TaskResult, HandlerError> {
        let output = (self.f)(task.clone()).await?;
        Ok(TaskResult::completed(task, output))
    }
}

/// Handler built from a synchronous closure, run on the blocking pool
pub struct BlockingFnHandler<F> {
    task_type: String,
    polling_interval: Duration,
    f: Arc<F>,
}

/// Create a handler from a blocking closure
///
/// The closure runs on `tokio::task::spawn_blocking`, so it may sleep or do
/// blocking I/O without stalling the poll ticks of other task types.
pub fn blocking_handler_fn<F>(task_type: impl Into<String>, f: F) -> BlockingFnHandler<F>
where
    F: Fn(&Task) -> Result<serde_json::Value, HandlerError> + Send + Sync + 'static,
{
    BlockingFnHandler {
        task_type: task_type.into(),
        polling_interval: DEFAULT_POLLING_INTERVAL,
        f: Arc::new(f),
    }
}

impl<F> BlockingFnHandler<F> {
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }
}

#[async_trait]
impl<F> TaskHandler for BlockingFnHandler<F>
where
    F: Fn(&Task) -> Result<serde_json::Value, HandlerError> + Send + Sync + 'static,
{
    fn task_type(&self) -> &str {
        &self.task_type
    }

    fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    async fn execute(&self, task: &Task) -> Result<TaskResult, HandlerError> {
        let f = Arc::clone(&self.f);
        let owned = task.clone();
        let output = tokio::task::spawn_blocking(move || f(&owned))
            .await
            .map_err(|e| {
                if e.is_panic() {
                    HandlerError::new(format!(
                        "handler panicked: {}",
                        panic_message(e.into_panic().as_ref())
                    ))
                } else {
                    HandlerError::new("handler was cancelled")
                }
            })??;
        Ok(TaskResult::completed(task, output))
    }
}

/// Overrides the polling interval of a registered handler
pub(crate) struct PollingIntervalOverride {
    inner: Arc<dyn TaskHandler>,
    interval: Duration,
}

impl PollingIntervalOverride {
    pub(crate) fn wrap(inner: Arc<dyn TaskHandler>, interval: Duration) -> Arc<dyn TaskHandler> {
        Arc::new(Self { inner, interval })
    }
}

#[async_trait]
impl TaskHandler for PollingIntervalOverride {
    fn task_type(&self) -> &str {
        self.inner.task_type()
    }

    fn polling_interval(&self) -> Duration {
        self.interval
    }

    fn paused(&self) -> bool {
        self.inner.paused()
    }

    fn identity(&self) -> Option<String> {
        self.inner.identity()
    }

    async fn execute(&self, task: &Task) -> Result<TaskResult, HandlerError> {
        self.inner.execute(task).await
    }

    fn on_report_failure(&self, result: &TaskResult) {
        self.inner.on_report_failure(result)
    }
}

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
