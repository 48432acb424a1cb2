//! Aggregate statistics for a batch run

use serde::Serialize;

use crate::task::{TaskRecord, TaskStatus};

/// Counts and timing aggregates derived from a task snapshot
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    /// All tracked tasks, terminal included
    pub total_tasks: usize,
    /// Tasks waiting in the queue
    pub queued: usize,
    /// Tasks currently mid-flight
    pub running: usize,
    /// Tasks that finished successfully
    pub completed: usize,
    /// Tasks that exhausted their retries
    pub failed: usize,
    /// Tasks cancelled before or during execution
    pub cancelled: usize,
    /// Sum of execution times of finished attempts, in seconds
    pub total_execution_time: f64,
    /// Mean execution time of finished attempts, in seconds
    pub average_task_time: f64,
}

impl BatchStats {
    /// Compute statistics from a snapshot of task records
    pub fn from_tasks(tasks: &[TaskRecord]) -> Self {
        let mut stats = BatchStats {
            total_tasks: tasks.len(),
            ..Default::default()
        };
        for task in tasks {
            match task.status {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        let times: Vec<f64> = tasks.iter().filter_map(TaskRecord::execution_time).collect();
        if !times.is_empty() {
            stats.total_execution_time = times.iter().sum();
            stats.average_task_time = stats.total_execution_time / times.len() as f64;
        }
        stats
    }

    /// Tasks in a terminal status
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    /// Overall completion percentage: `finished / total * 100`
    pub fn progress_percentage(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        self.finished() as f64 / self.total_tasks as f64 * 100.0
    }

    /// Rough remaining-time estimate in seconds, from the average task time
    pub fn estimated_time_remaining(&self) -> Option<f64> {
        if self.average_task_time == 0.0 || self.total_tasks == 0 {
            return None;
        }
        let remaining = self.total_tasks - self.finished();
        Some(remaining as f64 * self.average_task_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskQueue;
    use crate::task::{OperationCall, TaskSpec};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn counts_and_progress() {
        let queue = TaskQueue::new();
        let a = queue.add(TaskSpec::new("a", OperationCall::new("echo")));
        let b = queue.add(TaskSpec::new("b", OperationCall::new("echo")));
        queue.add(TaskSpec::new("c", OperationCall::new("echo")));
        queue.pop_next().unwrap();
        queue.pop_next().unwrap();
        queue.complete(&a, json!(1)).unwrap();
        queue.fail(&b, "boom".into()).unwrap();

        let stats = BatchStats::from_tasks(&queue.snapshot());
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.finished(), 2);
        assert!((stats.progress_percentage() - 66.666).abs() < 0.1);
    }

    #[test]
    fn empty_snapshot_has_no_estimate() {
        let stats = BatchStats::from_tasks(&[]);
        assert_eq!(stats.progress_percentage(), 0.0);
        assert!(stats.estimated_time_remaining().is_none());
    }
}
