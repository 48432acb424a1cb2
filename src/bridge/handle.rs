//! Deferred handles for submitted operations
//!
//! A [`TaskHandle`] is the caller-facing reference to one submitted operation: it can
//! be polled (`is_ready`), waited on from a blocking thread (`wait_sync`), awaited from
//! any runtime (`wait`), cancelled, or restarted. The completion slot is shared between
//! the submitter and the background executor; once resolved it keeps its outcome, so
//! repeated waits return the same value. Dropping a handle does not cancel the work.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{BatchError, Result};

/// Resolved outcome of one submitted operation
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// The operation returned a value
    Completed(Value),
    /// The operation returned an error or panicked
    Failed(String),
    /// The operation was cancelled before producing an outcome
    Cancelled,
}

impl TaskOutcome {
    fn into_result(self) -> Result<Value> {
        match self {
            TaskOutcome::Completed(value) => Ok(value),
            TaskOutcome::Failed(message) => Err(BatchError::Operation(message)),
            TaskOutcome::Cancelled => Err(BatchError::Cancelled),
        }
    }
}

pub(crate) type OpFactory =
    dyn Fn(CancellationToken) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// Completion slot shared by the submitter and the background executor.
///
/// The condvar serves blocking waiters, the notify serves async waiters; both are
/// signalled on every completion. `epoch` guards against a cancelled attempt writing
/// its outcome over a restarted one.
struct Shared {
    slot: Mutex<Option<TaskOutcome>>,
    cond: Condvar,
    notify: Notify,
    epoch: AtomicU64,
}

impl Shared {
    fn complete(&self, epoch: u64, outcome: TaskOutcome) {
        {
            let mut slot = self.slot.lock();
            if self.epoch.load(Ordering::Acquire) != epoch {
                debug!("stale attempt outcome discarded");
                return;
            }
            if slot.is_none() {
                *slot = Some(outcome);
            }
        }
        self.cond.notify_all();
        self.notify.notify_waiters();
    }
}

struct HandleInner {
    shared: Shared,
    runtime: tokio::runtime::Handle,
    op: Box<OpFactory>,
    token: Mutex<CancellationToken>,
}

/// Caller-facing reference to one submitted asynchronous operation
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<HandleInner>,
}

impl TaskHandle {
    pub(crate) fn spawn(runtime: tokio::runtime::Handle, op: Box<OpFactory>) -> Self {
        let token = CancellationToken::new();
        let handle = TaskHandle {
            inner: Arc::new(HandleInner {
                shared: Shared {
                    slot: Mutex::new(None),
                    cond: Condvar::new(),
                    notify: Notify::new(),
                    epoch: AtomicU64::new(0),
                },
                runtime,
                op,
                token: Mutex::new(token.clone()),
            }),
        };
        Self::spawn_attempt(&handle.inner, token, 0);
        handle
    }

    /// Non-blocking: true once the operation has finished (success, failure, or
    /// cancellation)
    pub fn is_ready(&self) -> bool {
        self.inner.shared.slot.lock().is_some()
    }

    /// True while an attempt is still in flight
    pub fn is_running(&self) -> bool {
        !self.is_ready()
    }

    /// Block the calling thread until the operation resolves or `timeout` elapses.
    ///
    /// Idempotent once resolved: repeated calls return the same outcome. Must not be
    /// called from within the background runtime itself.
    pub fn wait_sync(&self, timeout: Duration) -> Result<Value> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.shared.slot.lock();
        loop {
            if let Some(outcome) = slot.clone() {
                return outcome.into_result();
            }
            if Instant::now() >= deadline {
                return Err(BatchError::Timeout(timeout));
            }
            self.inner.shared.cond.wait_until(&mut slot, deadline);
        }
    }

    /// Await the outcome from any concurrent context; never requires the caller to be
    /// on the background runtime
    pub async fn wait(&self) -> Result<Value> {
        loop {
            let notified = self.inner.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.inner.shared.slot.lock().clone() {
                return outcome.into_result();
            }
            notified.await;
        }
    }

    /// Await the outcome with a deadline
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<Value> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(BatchError::Timeout(timeout)),
        }
    }

    /// Request cooperative cancellation.
    ///
    /// Deterministic if the operation has not started or is parked at an await point;
    /// best-effort otherwise, since the operation must observe its token to exit early.
    pub fn cancel(&self) {
        self.inner.token.lock().cancel();
    }

    /// Cancel the current attempt (if any) and resubmit the same operation as a new
    /// attempt on this handle
    pub fn restart(&self) {
        let mut token = self.inner.token.lock();
        // Bump the epoch first so the old attempt's outcome is discarded even if it
        // resolves between the cancel and the respawn.
        let epoch = self.inner.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        token.cancel();
        *token = CancellationToken::new();
        let fresh = token.clone();
        drop(token);
        *self.inner.shared.slot.lock() = None;
        Self::spawn_attempt(&self.inner, fresh, epoch);
    }

    fn spawn_attempt(inner: &Arc<HandleInner>, token: CancellationToken, epoch: u64) {
        let future = (inner.op)(token.clone());
        let inner = Arc::clone(inner);
        inner.runtime.clone().spawn(async move {
            let work = AssertUnwindSafe(future).catch_unwind();
            let outcome = tokio::select! {
                _ = token.cancelled() => TaskOutcome::Cancelled,
                result = work => match result {
                    Ok(Ok(value)) => TaskOutcome::Completed(value),
                    Ok(Err(BatchError::Cancelled)) => TaskOutcome::Cancelled,
                    // Keep the operation's own message verbatim; other errors keep
                    // their full rendering.
                    Ok(Err(BatchError::Operation(message))) => TaskOutcome::Failed(message),
                    Ok(Err(err)) => TaskOutcome::Failed(err.to_string()),
                    Err(panic) => TaskOutcome::Failed(panic_message(panic)),
                },
            };
            inner.shared.complete(epoch, outcome);
        });
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("operation panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("operation panicked: {message}")
    } else {
        "operation panicked".to_string()
    }
}
