//! TaskServerClient trait definition

use async_trait::async_trait;

use crate::task::{Task, TaskResult};

/// Error type for server calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerError {
    /// Network or server unavailability; reports are retried, polls are skipped
    #[error("transient server error: {0}")]
    Transient(String),

    /// The server rejected the request (e.g. a malformed result); never retried
    #[error("server rejected request: {0}")]
    Permanent(String),
}

impl ServerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Whether the failed call may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Connection to the orchestration server
///
/// Shared by every poll tick and execution of a host, so implementations must
/// support concurrent calls. The transport (HTTP, gRPC) is up to the
/// implementation.
#[async_trait]
pub trait TaskServerClient: Send + Sync + 'static {
    /// Poll for at most one task of `task_type`
    ///
    /// `domain` scopes the poll to a queue partition; `None` polls the
    /// global queue. Returns `Ok(None)` when no task is available.
    async fn poll_task(
        &self,
        task_type: &str,
        worker_id: &str,
        domain: Option<&str>,
    ) -> Result<Option<Task>, ServerError>;

    /// Send a task result back to the server
    async fn report_result(&self, result: &TaskResult) -> Result<(), ServerError>;
}
