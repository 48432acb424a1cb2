//! Priority queue of task records
//!
//! Holds every [`TaskRecord`] for the life of a batch (queued, running, and terminal)
//! behind a single mutex, because multiple workers poll concurrently. Ordering is
//! priority descending, then creation time ascending, then insertion sequence, so ties
//! within a priority band stay FIFO even when timestamps collide.
//!
//! The linchpin invariant lives in [`TaskQueue::pop_next`]: the QUEUED→RUNNING flip and
//! the `started_at` stamp happen under the same lock as the selection, so no task can be
//! picked by two workers.

use std::cmp::Reverse;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::task::{TaskId, TaskRecord, TaskSpec, TaskStatus};
use crate::{BatchError, Result};

struct QueueInner {
    // Entries keep their sort position for their whole lifetime; retried tasks flip
    // back to Queued in place and therefore keep their original ordering key.
    entries: Vec<Entry>,
    next_seq: u64,
}

struct Entry {
    seq: u64,
    record: TaskRecord,
}

/// Ordered collection of task records with serialized mutation
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
}

impl TaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                entries: Vec::new(),
                next_seq: 0,
            }),
        }
    }

    /// Insert a task; returns its id. Never rejects; backpressure is out of scope.
    pub fn add(&self, spec: TaskSpec) -> TaskId {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        let id = TaskId::generate(seq);
        let record = TaskRecord::new(id.clone(), spec);
        info!(
            task_id = %id,
            name = %record.name,
            function = %record.operation.function,
            priority = %record.priority,
            "task added to queue"
        );
        inner.entries.push(Entry { seq, record });
        // Stable sort: equal keys keep insertion order.
        inner
            .entries
            .sort_by_key(|e| (Reverse(e.record.priority), e.record.created_at, e.seq));
        id
    }

    /// Pop the highest-priority queued task, transitioning it to RUNNING and stamping
    /// `started_at` atomically with the selection. Returns a snapshot copy.
    pub fn pop_next(&self) -> Option<TaskRecord> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| e.record.status == TaskStatus::Queued)?;
        entry.record.status = TaskStatus::Running;
        entry.record.started_at = Some(Utc::now());
        Some(entry.record.clone())
    }

    /// Snapshot of one task by id
    pub fn get(&self, id: &TaskId) -> Result<TaskRecord> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .find(|e| &e.record.id == id)
            .map(|e| e.record.clone())
            .ok_or_else(|| BatchError::NotFound(id.to_string()))
    }

    /// Mark a running task completed with its result value
    pub fn complete(&self, id: &TaskId, result: Value) -> Result<()> {
        self.with_record(id, |record| {
            record.status = TaskStatus::Completed;
            record.result = Some(result);
            record.error = None;
            record.completed_at = Some(Utc::now());
        })
    }

    /// Mark a running task failed with its final error detail
    pub fn fail(&self, id: &TaskId, error: String) -> Result<()> {
        self.with_record(id, |record| {
            record.status = TaskStatus::Failed;
            record.error = Some(error);
            record.result = None;
            record.completed_at = Some(Utc::now());
        })
    }

    /// Requeue a failed attempt: increment `retry_count`, reset to QUEUED, clear
    /// `started_at`. The task keeps its original position within its priority band.
    /// Returns the new retry count.
    pub fn retry(&self, id: &TaskId) -> Result<u32> {
        let mut count = 0;
        self.with_record(id, |record| {
            record.retry_count += 1;
            record.status = TaskStatus::Queued;
            record.started_at = None;
            count = record.retry_count;
        })?;
        Ok(count)
    }

    /// Cancel a task that is still QUEUED. Returns `Ok(true)` if it was cancelled,
    /// `Ok(false)` if it had already been picked up or finished. Cancelling a RUNNING
    /// task goes through its execution handle instead.
    pub fn cancel(&self, id: &TaskId) -> Result<bool> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| &e.record.id == id)
            .ok_or_else(|| BatchError::NotFound(id.to_string()))?;
        if entry.record.status != TaskStatus::Queued {
            return Ok(false);
        }
        entry.record.status = TaskStatus::Cancelled;
        entry.record.completed_at = Some(Utc::now());
        debug!(task_id = %id, "queued task cancelled");
        Ok(true)
    }

    /// Record that a RUNNING task observed its cancellation signal
    pub fn mark_cancelled(&self, id: &TaskId) -> Result<()> {
        self.with_record(id, |record| {
            record.status = TaskStatus::Cancelled;
            record.result = None;
            record.completed_at = Some(Utc::now());
        })
    }

    /// Remove all terminal tasks; returns how many were removed
    pub fn clear_terminal(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|e| !e.record.status.is_terminal());
        before - inner.entries.len()
    }

    /// Defensive copy of every task for reporting
    pub fn snapshot(&self) -> Vec<TaskRecord> {
        let inner = self.inner.lock();
        inner.entries.iter().map(|e| e.record.clone()).collect()
    }

    /// Number of tasks still in QUEUED state
    pub fn queued_count(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|e| e.record.status == TaskStatus::Queued)
            .count()
    }

    /// Total number of tracked tasks, terminal included
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when no tasks are tracked at all
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    fn with_record(&self, id: &TaskId, f: impl FnOnce(&mut TaskRecord)) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| &e.record.id == id)
            .ok_or_else(|| BatchError::NotFound(id.to_string()))?;
        f(&mut entry.record);
        Ok(())
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{OperationCall, Priority};
    use serde_json::json;

    fn spec(name: &str, priority: Priority) -> TaskSpec {
        TaskSpec::new(name, OperationCall::new("echo")).with_priority(priority)
    }

    #[test]
    fn pop_prefers_higher_priority() {
        let queue = TaskQueue::new();
        queue.add(spec("low", Priority::Low));
        queue.add(spec("critical", Priority::Critical));
        queue.add(spec("medium", Priority::Medium));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop_next())
            .map(|t| t.name)
            .collect();
        assert_eq!(order, vec!["critical", "medium", "low"]);
    }

    #[test]
    fn equal_priority_is_fifo() {
        let queue = TaskQueue::new();
        for i in 0..5 {
            queue.add(spec(&format!("t{i}"), Priority::Medium));
        }
        for i in 0..5 {
            let task = queue.pop_next().unwrap();
            assert_eq!(task.name, format!("t{i}"));
        }
    }

    #[test]
    fn pop_marks_running_and_stamps_start() {
        let queue = TaskQueue::new();
        let id = queue.add(spec("t", Priority::Medium));
        let popped = queue.pop_next().unwrap();
        assert_eq!(popped.id, id);
        assert_eq!(popped.status, TaskStatus::Running);
        assert!(popped.started_at.is_some());
        // No second worker can pick it up.
        assert!(queue.pop_next().is_none());
    }

    #[test]
    fn cancel_only_while_queued() {
        let queue = TaskQueue::new();
        let id = queue.add(spec("t", Priority::Medium));
        assert!(queue.cancel(&id).unwrap());
        let record = queue.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.completed_at.is_some());
        assert!(record.result.is_none());
        // A cancelled task never transitions to RUNNING afterwards.
        assert!(queue.pop_next().is_none());

        let id2 = queue.add(spec("t2", Priority::Medium));
        queue.pop_next().unwrap();
        assert!(!queue.cancel(&id2).unwrap());
    }

    #[test]
    fn retry_requeues_and_clears_start() {
        let queue = TaskQueue::new();
        let id = queue.add(spec("t", Priority::Medium));
        queue.pop_next().unwrap();
        let count = queue.retry(&id).unwrap();
        assert_eq!(count, 1);
        let record = queue.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Queued);
        assert!(record.started_at.is_none());
        // Eligible to be picked again, by any worker.
        assert_eq!(queue.pop_next().unwrap().id, id);
    }

    #[test]
    fn terminal_outcomes_are_exclusive() {
        let queue = TaskQueue::new();
        let done = queue.add(spec("done", Priority::Medium));
        let broken = queue.add(spec("broken", Priority::Medium));
        queue.pop_next().unwrap();
        queue.pop_next().unwrap();
        queue.complete(&done, json!({"ok": true})).unwrap();
        queue.fail(&broken, "boom".into()).unwrap();

        let done = queue.get(&done).unwrap();
        assert!(done.result.is_some() && done.error.is_none());
        let broken = queue.get(&broken).unwrap();
        assert!(broken.error.is_some() && broken.result.is_none());
        assert!(done.completed_at.is_some() && broken.completed_at.is_some());
    }

    #[test]
    fn clear_terminal_removes_only_finished() {
        let queue = TaskQueue::new();
        let a = queue.add(spec("a", Priority::Medium));
        queue.add(spec("b", Priority::Medium));
        queue.pop_next().unwrap();
        queue.complete(&a, json!(null)).unwrap();
        assert_eq!(queue.clear_terminal(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let queue = TaskQueue::new();
        let ghost = TaskId::generate(999);
        assert!(matches!(queue.get(&ghost), Err(BatchError::NotFound(_))));
        assert!(matches!(queue.cancel(&ghost), Err(BatchError::NotFound(_))));
        assert!(matches!(queue.retry(&ghost), Err(BatchError::NotFound(_))));
    }

    #[test]
    fn snapshot_is_a_copy() {
        let queue = TaskQueue::new();
        queue.add(spec("t", Priority::Medium));
        let mut snap = queue.snapshot();
        snap[0].status = TaskStatus::Failed;
        assert_eq!(queue.snapshot()[0].status, TaskStatus::Queued);
    }
}
