//! Batch controller
//!
//! Public façade coordinating queue, pool, and bridge: add tasks, start a bounded
//! concurrent run (with an optional batch-level timeout), stop it gracefully or not,
//! inspect progress, and export results. `status` and `results` always succeed and
//! reflect the latest known state; only contract violations (double start, empty
//! queue, unknown ids) return errors.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::batch::export::{write_export, ExportFormat};
use crate::batch::BatchStats;
use crate::bridge::ExecutionContext;
use crate::ops::OperationRegistry;
use crate::pool::{PoolConfig, WorkerPool};
use crate::queue::TaskQueue;
use crate::task::{TaskId, TaskRecord, TaskSpec, TaskStatus};
use crate::{BatchError, Result};

/// Aggregate view of a batch run
#[derive(Debug, Clone)]
pub struct BatchStatus {
    /// Whether a run is currently active
    pub running: bool,
    /// Counts and timing aggregates
    pub stats: BatchStats,
    /// Full task snapshot, present when a detailed status was requested
    pub tasks: Option<Vec<TaskRecord>>,
}

/// Orchestrates pool lifecycle and reporting over one task queue
pub struct BatchController {
    queue: Arc<TaskQueue>,
    registry: Arc<OperationRegistry>,
    bridge: Arc<ExecutionContext>,
    active_pool: Mutex<Option<Arc<WorkerPool>>>,
    running_tx: watch::Sender<bool>,
    running_rx: watch::Receiver<bool>,
}

impl BatchController {
    /// Create a controller with an empty queue
    pub fn new(bridge: Arc<ExecutionContext>, registry: Arc<OperationRegistry>) -> Self {
        let (running_tx, running_rx) = watch::channel(false);
        Self {
            queue: Arc::new(TaskQueue::new()),
            registry,
            bridge,
            active_pool: Mutex::new(None),
            running_tx,
            running_rx,
        }
    }

    /// Queue one task; returns its id
    pub fn add(&self, spec: TaskSpec) -> TaskId {
        self.queue.add(spec)
    }

    /// Queue several tasks; returns their ids in order
    pub fn add_batch(&self, specs: Vec<TaskSpec>) -> Vec<TaskId> {
        specs.into_iter().map(|spec| self.queue.add(spec)).collect()
    }

    /// Start a batch run.
    ///
    /// Fails with [`BatchError::AlreadyRunning`] if a run is active, or
    /// [`BatchError::EmptyQueue`] if nothing is queued. If the config carries a
    /// timeout, the run stops starting new tasks once it elapses; tasks mid-flight
    /// are allowed to finish.
    pub fn start(&self, config: PoolConfig) -> Result<()> {
        let mut active = self.active_pool.lock();
        if *self.running_rx.borrow() {
            return Err(BatchError::AlreadyRunning);
        }
        if self.queue.queued_count() == 0 {
            return Err(BatchError::EmptyQueue);
        }

        info!(
            queued = self.queue.queued_count(),
            workers = config.max_concurrent,
            timeout = ?config.timeout,
            "batch execution started"
        );

        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.registry),
            Arc::clone(&self.bridge),
            config.clone(),
        ));
        let workers = pool.spawn_workers();
        let _ = self.running_tx.send(true);

        // The supervisor waits the run out on the bridge runtime, enforces the batch
        // timeout, and flips the running flag when the last worker exits.
        let supervisor_pool = Arc::clone(&pool);
        let queue = Arc::clone(&self.queue);
        let running_tx = self.running_tx.clone();
        self.bridge.runtime().spawn(async move {
            let mut joined = Box::pin(futures::future::join_all(workers));
            match config.timeout {
                Some(timeout) => {
                    tokio::select! {
                        _ = &mut joined => {}
                        _ = tokio::time::sleep(timeout) => {
                            warn!(?timeout, "batch timeout elapsed, no new tasks will start");
                            supervisor_pool.request_stop();
                            let _ = joined.await;
                        }
                    }
                }
                None => {
                    let _ = joined.await;
                }
            }
            let stats = BatchStats::from_tasks(&queue.snapshot());
            info!(
                completed = stats.completed,
                failed = stats.failed,
                cancelled = stats.cancelled,
                still_queued = stats.queued,
                avg_task_time_s = stats.average_task_time,
                "batch execution finished"
            );
            let _ = running_tx.send(false);
        });

        *active = Some(pool);
        Ok(())
    }

    /// Stop the active run. Graceful lets in-flight tasks finish and stops pulling new
    /// ones; non-graceful additionally requests cancellation of in-flight tasks.
    pub fn stop(&self, graceful: bool) {
        let active = self.active_pool.lock();
        match active.as_ref() {
            Some(pool) if *self.running_rx.borrow() => {
                info!(graceful, "batch stop requested");
                pool.request_stop();
                if !graceful {
                    pool.cancel_inflight();
                }
            }
            _ => warn!("batch stop requested but no run is active"),
        }
    }

    /// Whether a run is currently active
    pub fn is_running(&self) -> bool {
        *self.running_rx.borrow()
    }

    /// Wait until the active run (if any) finishes
    pub async fn join(&self) {
        let mut rx = self.running_rx.clone();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Aggregate counts and progress; includes the full task snapshot when `detailed`
    pub fn status(&self, detailed: bool) -> BatchStatus {
        let tasks = self.queue.snapshot();
        let stats = BatchStats::from_tasks(&tasks);
        BatchStatus {
            running: *self.running_rx.borrow(),
            stats,
            tasks: detailed.then_some(tasks),
        }
    }

    /// Snapshot copies of all tasks, optionally filtered by status
    pub fn results(&self, filter_status: Option<TaskStatus>) -> Vec<TaskRecord> {
        let tasks = self.queue.snapshot();
        match filter_status {
            Some(status) => tasks.into_iter().filter(|t| t.status == status).collect(),
            None => tasks,
        }
    }

    /// Export the current results to `path`; returns the number of tasks written
    pub fn export(&self, format: ExportFormat, path: impl AsRef<Path>) -> Result<usize> {
        write_export(&self.results(None), format, path)
    }

    /// Cancel a task that is still queued. Cancelling a running task requires a
    /// non-graceful [`BatchController::stop`].
    pub fn cancel(&self, id: &TaskId) -> Result<bool> {
        self.queue.cancel(id)
    }

    /// Remove all terminal tasks; returns how many were removed
    pub fn clear_completed(&self) -> usize {
        self.queue.clear_terminal()
    }
}
