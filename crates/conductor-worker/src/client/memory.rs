//! In-memory implementation of TaskServerClient for testing

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::server::{ServerError, TaskServerClient};
use crate::task::{Task, TaskResult};

/// A poll request received by the in-memory server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRecord {
    pub task_type: String,
    pub worker_id: String,
    pub domain: Option<String>,
}

type QueueKey = (String, Option<String>);

/// In-memory task server
///
/// Keeps one queue per task type and domain, records every poll and every
/// accepted result, and can inject transient or permanent failures.
///
/// # Example
///
/// ```
/// use conductor_worker::client::InMemoryTaskServer;
/// use conductor_worker::task::Task;
///
/// let server = InMemoryTaskServer::new();
/// server.enqueue(Task::new("echo", serde_json::json!({"msg": "hi"})));
/// assert_eq!(server.pending_count("echo"), 1);
/// ```
pub struct InMemoryTaskServer {
    queues: Mutex<HashMap<QueueKey, VecDeque<Task>>>,
    polls: Mutex<Vec<PollRecord>>,
    reported: Mutex<Vec<TaskResult>>,
    report_attempts: AtomicUsize,
    fail_polls: AtomicBool,
    transient_report_failures: AtomicU32,
    reject_reports: AtomicBool,
}

impl InMemoryTaskServer {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            polls: Mutex::new(Vec::new()),
            reported: Mutex::new(Vec::new()),
            report_attempts: AtomicUsize::new(0),
            fail_polls: AtomicBool::new(false),
            transient_report_failures: AtomicU32::new(0),
            reject_reports: AtomicBool::new(false),
        }
    }

    /// Queue a task under its type and domain
    pub fn enqueue(&self, task: Task) {
        let key = (task.task_type.clone(), task.domain.clone());
        self.queues.lock().entry(key).or_default().push_back(task);
    }

    /// Tasks of `task_type` still queued, across all domains
    pub fn pending_count(&self, task_type: &str) -> usize {
        self.queues
            .lock()
            .iter()
            .filter(|((t, _), _)| t == task_type)
            .map(|(_, q)| q.len())
            .sum()
    }

    /// Total number of poll calls received
    pub fn poll_count(&self) -> usize {
        self.polls.lock().len()
    }

    /// Number of poll calls received for one task type
    pub fn poll_count_for(&self, task_type: &str) -> usize {
        self.polls
            .lock()
            .iter()
            .filter(|p| p.task_type == task_type)
            .count()
    }

    /// Every poll call received, in order
    pub fn polls(&self) -> Vec<PollRecord> {
        self.polls.lock().clone()
    }

    /// Number of report calls received, including failed ones
    pub fn report_attempts(&self) -> usize {
        self.report_attempts.load(Ordering::SeqCst)
    }

    /// Results accepted by the server
    pub fn reported(&self) -> Vec<TaskResult> {
        self.reported.lock().clone()
    }

    /// Make every poll fail with a transient error
    pub fn set_fail_polls(&self, fail: bool) {
        self.fail_polls.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` report calls with a transient error
    pub fn fail_next_reports(&self, count: u32) {
        self.transient_report_failures.store(count, Ordering::SeqCst);
    }

    /// Reject every report with a permanent error
    pub fn set_reject_reports(&self, reject: bool) {
        self.reject_reports.store(reject, Ordering::SeqCst);
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.queues.lock().clear();
        self.polls.lock().clear();
        self.reported.lock().clear();
        self.report_attempts.store(0, Ordering::SeqCst);
    }
}

impl Default for InMemoryTaskServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskServerClient for InMemoryTaskServer {
    async fn poll_task(
        &self,
        task_type: &str,
        worker_id: &str,
        domain: Option<&str>,
    ) -> Result<Option<Task>, ServerError> {
        self.polls.lock().push(PollRecord {
            task_type: task_type.to_string(),
            worker_id: worker_id.to_string(),
            domain: domain.map(str::to_string),
        });

        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(ServerError::transient("poll failed (injected)"));
        }

        let key = (task_type.to_string(), domain.map(str::to_string));
        let task = self
            .queues
            .lock()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front());

        Ok(task.map(|mut task| {
            task.poll_count += 1;
            task.worker_id = Some(worker_id.to_string());
            task
        }))
    }

    async fn report_result(&self, result: &TaskResult) -> Result<(), ServerError> {
        self.report_attempts.fetch_add(1, Ordering::SeqCst);

        if self.reject_reports.load(Ordering::SeqCst) {
            return Err(ServerError::permanent(format!(
                "result for task {} rejected (injected)",
                result.task_id
            )));
        }

        let injected_failure = self
            .transient_report_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected_failure {
            return Err(ServerError::transient("report failed (injected)"));
        }

        self.reported.lock().push(result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_poll_respects_domain() {
        let server = InMemoryTaskServer::new();
        server.enqueue(Task::new("encode", json!({})).with_domain("canary"));

        let global = server.poll_task("encode", "w-1", None).await.unwrap();
        assert!(global.is_none());

        let scoped = server
            .poll_task("encode", "w-1", Some("canary"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scoped.poll_count, 1);
        assert_eq!(scoped.worker_id.as_deref(), Some("w-1"));
        assert_eq!(server.poll_count(), 2);
        assert_eq!(server.polls()[1].domain.as_deref(), Some("canary"));
    }

    #[tokio::test]
    async fn test_injected_report_failures() {
        let server = InMemoryTaskServer::new();
        let task = Task::new("echo", json!({}));
        let result = TaskResult::completed(&task, json!({}));

        server.fail_next_reports(2);
        assert!(server.report_result(&result).await.unwrap_err().is_retryable());
        assert!(server.report_result(&result).await.is_err());
        assert!(server.report_result(&result).await.is_ok());

        assert_eq!(server.report_attempts(), 3);
        assert_eq!(server.reported().len(), 1);

        server.set_reject_reports(true);
        let err = server.report_result(&result).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_failing_polls() {
        let server = InMemoryTaskServer::new();
        server.enqueue(Task::new("echo", json!({})));
        server.set_fail_polls(true);

        assert!(server.poll_task("echo", "w-1", None).await.is_err());
        assert_eq!(server.pending_count("echo"), 1);

        server.clear();
        assert_eq!(server.poll_count(), 0);
        assert_eq!(server.pending_count("echo"), 0);
    }
}
