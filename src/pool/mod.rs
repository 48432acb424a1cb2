//! Concurrent worker pool
//!
//! Up to `max_concurrent` workers loop over the queue: pop the next task, invoke its
//! operation through the execution bridge, await the outcome with no per-task deadline,
//! apply the retry policy, record the result, yield briefly, repeat. A worker exits when
//! the queue has no more QUEUED tasks or the pool is told to stop.
//!
//! Failing a task never crashes a worker: every operation error becomes task state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bridge::{ExecutionContext, TaskHandle};
use crate::ops::OperationRegistry;
use crate::queue::TaskQueue;
use crate::task::{TaskId, TaskRecord};
use crate::BatchError;

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of concurrent workers
    pub max_concurrent: usize,
    /// How long a worker yields between iterations to avoid busy-spinning
    pub poll_interval: Duration,
    /// Optional deadline for the whole batch run; once elapsed, no new tasks are
    /// started (tasks mid-flight are allowed to finish)
    pub timeout: Option<Duration>,
}

impl PoolConfig {
    /// Configuration with `max_concurrent` workers and defaults otherwise
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            poll_interval: Duration::from_millis(100),
            timeout: None,
        }
    }

    /// Set the batch-level timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the inter-iteration yield
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

/// Pool of workers pulling from one queue through one execution bridge
pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    registry: Arc<OperationRegistry>,
    bridge: Arc<ExecutionContext>,
    config: PoolConfig,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    inflight: Mutex<HashMap<TaskId, TaskHandle>>,
}

impl WorkerPool {
    /// Create a pool; workers are not started until [`WorkerPool::spawn_workers`]
    pub fn new(
        queue: Arc<TaskQueue>,
        registry: Arc<OperationRegistry>,
        bridge: Arc<ExecutionContext>,
        config: PoolConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            queue,
            registry,
            bridge,
            config,
            stop_tx,
            stop_rx,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn `max_concurrent` worker loops onto the bridge runtime
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(
            workers = self.config.max_concurrent,
            timeout = ?self.config.timeout,
            "starting worker pool"
        );
        (0..self.config.max_concurrent)
            .map(|worker_id| {
                let pool = Arc::clone(self);
                self.bridge
                    .runtime()
                    .spawn(async move { pool.worker_loop(worker_id).await })
            })
            .collect()
    }

    /// Signal every worker to stop pulling new tasks
    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Request cooperative cancellation of every in-flight task
    pub fn cancel_inflight(&self) {
        let inflight = self.inflight.lock();
        for (task_id, handle) in inflight.iter() {
            warn!(task_id = %task_id, "cancelling in-flight task");
            handle.cancel();
        }
    }

    /// Number of tasks currently mid-flight
    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().len()
    }

    async fn worker_loop(&self, worker_id: usize) {
        let stop_rx = self.stop_rx.clone();
        loop {
            if *stop_rx.borrow() {
                debug!(worker = worker_id, "worker stopping on request");
                break;
            }
            let Some(task) = self.queue.pop_next() else {
                debug!(worker = worker_id, "queue exhausted, worker exiting");
                break;
            };
            self.run_task(worker_id, task).await;
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One attempt: submit through the bridge, await, apply the failure policy
    async fn run_task(&self, worker_id: usize, task: TaskRecord) {
        info!(
            worker = worker_id,
            task_id = %task.id,
            name = %task.name,
            function = %task.operation.function,
            attempt = task.retry_count + 1,
            "task started"
        );

        let registry = Arc::clone(&self.registry);
        let call = task.operation.clone();
        let handle = self.bridge.submit(move |cancel| {
            let registry = Arc::clone(&registry);
            let call = call.clone();
            async move { registry.invoke(&call.function, call.params, cancel).await }
        });

        self.inflight.lock().insert(task.id.clone(), handle.clone());
        let outcome = handle.wait().await;
        self.inflight.lock().remove(&task.id);

        let update = match outcome {
            Ok(value) => {
                info!(worker = worker_id, task_id = %task.id, name = %task.name, "task completed");
                self.queue.complete(&task.id, value)
            }
            Err(BatchError::Cancelled) => {
                warn!(worker = worker_id, task_id = %task.id, name = %task.name, "task cancelled");
                self.queue.mark_cancelled(&task.id)
            }
            Err(err) => {
                // Keep the operation's own message verbatim; other bridge errors keep
                // their full rendering.
                let detail = match err {
                    BatchError::Operation(message) => message,
                    other => other.to_string(),
                };
                if task.retry_count < task.max_retries {
                    match self.queue.retry(&task.id) {
                        Ok(count) => {
                            warn!(
                                worker = worker_id,
                                task_id = %task.id,
                                name = %task.name,
                                retry = count,
                                max_retries = task.max_retries,
                                error = %detail,
                                "task failed, requeued for retry"
                            );
                            Ok(())
                        }
                        Err(err) => Err(err),
                    }
                } else {
                    error!(
                        worker = worker_id,
                        task_id = %task.id,
                        name = %task.name,
                        retries = task.retry_count,
                        error = %detail,
                        "task failed after all retries"
                    );
                    self.queue.fail(&task.id, detail)
                }
            }
        };
        // NotFound here means the record vanished mid-run (cleared externally); the
        // outcome is dropped but the worker keeps going.
        if let Err(err) = update {
            error!(worker = worker_id, task_id = %task.id, error = %err, "failed to record task outcome");
        }
    }
}
