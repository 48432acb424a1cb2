//! Task data model
//!
//! A [`TaskRecord`] tracks one unit of batch work through its lifecycle:
//! `QUEUED -> RUNNING -> {COMPLETED | FAILED | CANCELLED}`, with failed attempts
//! re-entering the queue while retries remain. Callers only ever see snapshot copies;
//! the queue owns the live records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::BatchError;

/// Process-local task identifier.
///
/// Carries a monotonic sequence component (assigned by the queue) plus a random
/// suffix, so ids remain distinguishable across queue instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub(crate) fn generate(seq: u64) -> Self {
        let entropy = Uuid::new_v4().simple().to_string();
        TaskId(format!("task-{}-{}", seq, &entropy[..8]))
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task priority levels, totally ordered `Critical > High > Medium > Low`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    /// Lowest priority band
    Low,
    /// Default priority band
    Medium,
    /// Runs before medium and low
    High,
    /// Runs before everything else
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

impl FromStr for Priority {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(BatchError::Operation(format!("unknown priority: {other}"))),
        }
    }
}

/// Task execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    /// Waiting in the queue
    Queued,
    /// Picked up by a worker
    Running,
    /// Finished successfully; `result` is set
    Completed,
    /// Exhausted its retries; `error` is set
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl TaskStatus {
    /// True for `Completed`, `Failed`, and `Cancelled`; no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

impl FromStr for TaskStatus {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(BatchError::Operation(format!("unknown status: {other}"))),
        }
    }
}

/// A named operation plus its keyword arguments.
///
/// Opaque to the scheduling core: the worker resolves `function` through the
/// operation registry and passes `params` along untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationCall {
    /// Registered operation name
    pub function: String,
    /// Keyword arguments for the operation
    pub params: Map<String, Value>,
}

impl OperationCall {
    /// Create a call with no arguments
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            params: Map::new(),
        }
    }

    /// Add one keyword argument
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Caller-facing description of a task to enqueue
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Human label, non-unique
    pub name: String,
    /// The operation to run
    pub call: OperationCall,
    /// Scheduling priority
    pub priority: Priority,
    /// How many failed attempts may be retried
    pub max_retries: u32,
}

impl TaskSpec {
    /// Create a spec with defaults: medium priority, 3 retries
    pub fn new(name: impl Into<String>, call: OperationCall) -> Self {
        Self {
            name: name.into(),
            call,
            priority: Priority::Medium,
            max_retries: 3,
        }
    }

    /// Set the scheduling priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// One unit of scheduled work and its lifecycle state.
///
/// Invariants upheld by the queue:
/// - `result` is set iff status is `Completed`; `error` iff status is `Failed`
/// - `started_at` is set iff the task has left `Queued`
/// - `completed_at` is set iff the status is terminal
/// - `retry_count <= max_retries`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Unique task identifier
    pub id: TaskId,
    /// Human label
    pub name: String,
    /// The operation and its arguments
    pub operation: OperationCall,
    /// Scheduling priority
    pub priority: Priority,
    /// Current lifecycle status
    pub status: TaskStatus,
    /// When the task was enqueued
    pub created_at: DateTime<Utc>,
    /// When a worker picked the task up; cleared when a failed attempt is requeued
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Failed attempts that have been retried so far
    pub retry_count: u32,
    /// Retry budget
    pub max_retries: u32,
    /// Operation output, present only when completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Final failure detail, present only when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    pub(crate) fn new(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            name: spec.name,
            operation: spec.call,
            priority: spec.priority,
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: spec.max_retries,
            result: None,
            error: None,
        }
    }

    /// Seconds between pick-up and completion of the final attempt, if both happened
    pub fn execution_time(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                Some((completed - started).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// Seconds spent waiting in the queue before (the latest) pick-up
    pub fn wait_time(&self) -> f64 {
        let start = self.started_at.unwrap_or_else(Utc::now);
        (start - self.created_at).num_milliseconds() as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn priority_total_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn priority_parses_case_insensitive() {
        assert_eq!("CRITICAL".parse::<Priority>().unwrap(), Priority::Critical);
        assert_eq!("medium".parse::<Priority>().unwrap(), Priority::Medium);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn spec_defaults() {
        let spec = TaskSpec::new("t", OperationCall::new("echo"));
        assert_eq!(spec.priority, Priority::Medium);
        assert_eq!(spec.max_retries, 3);
    }

    #[test]
    fn fresh_record_is_queued_with_no_outcome() {
        let record = TaskRecord::new(
            TaskId::generate(1),
            TaskSpec::new("t", OperationCall::new("echo")),
        );
        assert_eq!(record.status, TaskStatus::Queued);
        assert!(record.started_at.is_none());
        assert!(record.completed_at.is_none());
        assert!(record.result.is_none());
        assert!(record.error.is_none());
        assert_eq!(record.retry_count, 0);
        assert!(record.execution_time().is_none());
    }

    #[test]
    fn record_serializes_camel_case_and_uppercase_enums() {
        let record = TaskRecord::new(
            TaskId::generate(7),
            TaskSpec::new("t", OperationCall::new("echo").with_param("k", "v"))
                .with_priority(Priority::High),
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["priority"], json!("HIGH"));
        assert_eq!(value["status"], json!("QUEUED"));
        assert!(value.get("createdAt").is_some());
        assert!(value.get("result").is_none());
        assert_eq!(value["operation"]["function"], json!("echo"));
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
