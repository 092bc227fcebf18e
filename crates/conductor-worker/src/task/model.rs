//! Task and task result types exchanged with the server

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A task polled from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub task_type: String,
    pub workflow_instance_id: String,
    #[serde(default)]
    pub input_data: serde_json::Value,

    /// Queue partition the task was polled from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Number of times the server handed this task out
    #[serde(default)]
    pub poll_count: u32,

    /// Server-side retry attempt of the task (0 on first delivery)
    #[serde(default)]
    pub retry_count: u32,

    /// Worker that polled the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl Task {
    /// Create a task with a generated id
    pub fn new(task_type: impl Into<String>, input_data: serde_json::Value) -> Self {
        Self {
            task_id: Uuid::now_v7().to_string(),
            task_type: task_type.into(),
            workflow_instance_id: Uuid::now_v7().to_string(),
            input_data,
            domain: None,
            poll_count: 0,
            retry_count: 0,
            worker_id: None,
        }
    }

    /// Set the workflow instance id
    pub fn with_workflow_instance_id(mut self, id: impl Into<String>) -> Self {
        self.workflow_instance_id = id.into();
        self
    }

    /// Set the domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// Status reported back for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResultStatus {
    /// Work continues; the server re-delivers the task after the callback delay
    InProgress,
    Completed,
    /// Failed; the server may retry the task per its task definition
    Failed,
    /// Failed; the server must not retry
    FailedWithTerminalError,
}

impl TaskResultStatus {
    /// Whether this status ends the task
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::FailedWithTerminalError)
    }
}

impl std::fmt::Display for TaskResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::FailedWithTerminalError => write!(f, "FAILED_WITH_TERMINAL_ERROR"),
        }
    }
}

/// A log line attached to a task result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecLog {
    pub log: String,
    pub created_time: DateTime<Utc>,
}

impl TaskExecLog {
    pub fn new(log: impl Into<String>) -> Self {
        Self {
            log: log.into(),
            created_time: Utc::now(),
        }
    }
}

/// Outcome of executing a task, sent back to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub workflow_instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub status: TaskResultStatus,
    #[serde(default)]
    pub output_data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_for_incompletion: Option<String>,

    /// Seconds before the server re-delivers an in-progress task
    #[serde(default)]
    pub callback_after_seconds: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<TaskExecLog>,
}

impl TaskResult {
    fn for_task(task: &Task, status: TaskResultStatus) -> Self {
        Self {
            task_id: task.task_id.clone(),
            workflow_instance_id: task.workflow_instance_id.clone(),
            worker_id: task.worker_id.clone(),
            status,
            output_data: serde_json::Value::Null,
            reason_for_incompletion: None,
            callback_after_seconds: 0,
            logs: Vec::new(),
        }
    }

    /// Successful result carrying the handler output
    pub fn completed(task: &Task, output_data: serde_json::Value) -> Self {
        let mut result = Self::for_task(task, TaskResultStatus::Completed);
        result.output_data = output_data;
        result
    }

    /// Ask the server to hand the task out again after `callback_after`
    pub fn in_progress(task: &Task, callback_after: Duration) -> Self {
        let mut result = Self::for_task(task, TaskResultStatus::InProgress);
        result.callback_after_seconds = callback_after.as_secs();
        result
    }

    /// Failed result; the message is kept as the reason and as a log line
    pub fn failed(task: &Task, reason: impl Into<String>) -> Self {
        Self::failure(task, TaskResultStatus::Failed, reason.into())
    }

    /// Failed result that the server must not retry
    pub fn failed_with_terminal_error(task: &Task, reason: impl Into<String>) -> Self {
        Self::failure(task, TaskResultStatus::FailedWithTerminalError, reason.into())
    }

    fn failure(task: &Task, status: TaskResultStatus, reason: String) -> Self {
        let mut result = Self::for_task(task, status);
        result.logs.push(TaskExecLog::new(reason.clone()));
        result.reason_for_incompletion = Some(reason);
        result
    }

    /// Append a log line
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(TaskExecLog::new(line));
    }
}
