//! # batchq
//!
//! An asynchronous task-execution core: a shared background execution bridge plus a
//! priority-based batch scheduler with bounded parallelism, automatic retry,
//! cancellation, and result aggregation.
//!
//! ## Overview
//!
//! Work is described as a named operation with keyword arguments ([`task::OperationCall`])
//! and tracked through its lifecycle by a [`task::TaskRecord`]. Records sit in a
//! [`queue::TaskQueue`] ordered by priority (FIFO within a band); a
//! [`pool::WorkerPool`] runs them concurrently through the shared
//! [`bridge::ExecutionContext`], applying the retry policy; the
//! [`batch::BatchController`] coordinates the run and reports/exports results.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use batchq::batch::BatchController;
//! use batchq::bridge::ExecutionContext;
//! use batchq::ops::OperationRegistry;
//! use batchq::pool::PoolConfig;
//! use batchq::task::{OperationCall, Priority, TaskSpec};
//!
//! # async fn example() -> batchq::Result<()> {
//! let bridge = Arc::new(ExecutionContext::new()?);
//! let registry = Arc::new(OperationRegistry::with_builtins());
//! let controller = BatchController::new(bridge, registry);
//!
//! let call = OperationCall::new("simulate").with_param("duration", 0.5);
//! controller.add(TaskSpec::new("warm cache", call).with_priority(Priority::High));
//!
//! controller.start(PoolConfig::new(4))?;
//! controller.join().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

use std::time::Duration;

use thiserror::Error;

/// Result type for batchq operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Main error type for batchq operations
#[derive(Error, Debug)]
pub enum BatchError {
    /// The shared background execution environment failed to initialize within its
    /// startup budget. Fatal for the bridge instance.
    #[error("execution environment failed to start: {0}")]
    EnvironmentStart(String),

    /// A blocking result wait exceeded its allotted time. Recoverable: the wait may be
    /// retried or the handle abandoned.
    #[error("result wait timed out after {0:?}")]
    Timeout(Duration),

    /// The task was cancelled before or during execution
    #[error("task was cancelled")]
    Cancelled,

    /// The submitted operation itself failed
    #[error("operation failed: {0}")]
    Operation(String),

    /// No operation with the given name is registered
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Unknown task or handle identifier
    #[error("task not found: {0}")]
    NotFound(String),

    /// A batch run is already active
    #[error("batch execution is already running")]
    AlreadyRunning,

    /// `start` was called with nothing queued
    #[error("no queued tasks to execute")]
    EmptyQueue,

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error while exporting results
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Task data model: records, priorities, statuses, operation calls
pub mod task;

/// Priority queue of task records
pub mod queue;

/// Background execution bridge and deferred handles
pub mod bridge;

/// Operation dispatch: trait, registry, built-ins
pub mod ops;

/// Concurrent worker pool with retry policy
pub mod pool;

/// Batch orchestration, statistics, and export
pub mod batch;
