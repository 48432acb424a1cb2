//! Background execution bridge
//!
//! [`ExecutionContext`] owns one long-lived background runtime, decoupled from every
//! caller's own control flow, and hands out a [`TaskHandle`] per submission. Any number
//! of threads may submit and wait concurrently; submitted operations are executed on
//! the background runtime, never on the caller's thread. An error or panic inside an
//! operation surfaces only through the handle, never crashes the runtime.
//!
//! The bridge is an explicitly constructed service object: create it once, share it
//! behind an [`std::sync::Arc`], tear it down with [`ExecutionContext::shutdown`] (or
//! let `Drop` do it).

mod handle;

pub use handle::{TaskHandle, TaskOutcome};

use std::future::Future;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{BatchError, Result};

/// How long construction waits for the background runtime to signal readiness
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// The shared background execution environment
#[derive(Debug)]
pub struct ExecutionContext {
    runtime: tokio::runtime::Handle,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ExecutionContext {
    /// Start the background environment, waiting up to
    /// [`DEFAULT_STARTUP_TIMEOUT`] for it to come up
    pub fn new() -> Result<Self> {
        Self::with_startup_timeout(DEFAULT_STARTUP_TIMEOUT)
    }

    /// Start the background environment with an explicit startup budget.
    ///
    /// Fails with [`BatchError::EnvironmentStart`] if the runtime thread could not be
    /// spawned or does not signal readiness in time.
    pub fn with_startup_timeout(startup: Duration) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("execution-bridge".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_multi_thread()
                    .thread_name("bridge-worker")
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                // Park the runtime until shutdown; submissions are spawned onto it
                // from other threads via the handle.
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                debug!("execution bridge shutting down");
            })
            .map_err(|err| BatchError::EnvironmentStart(err.to_string()))?;

        let runtime = match ready_rx.recv_timeout(startup) {
            Ok(Ok(handle)) => handle,
            Ok(Err(message)) => return Err(BatchError::EnvironmentStart(message)),
            Err(_) => {
                return Err(BatchError::EnvironmentStart(format!(
                    "no readiness signal within {startup:?}"
                )))
            }
        };

        info!("execution bridge started");
        Ok(Self {
            runtime,
            shutdown: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Schedule `op` to start executing in the background environment. Never blocks.
    ///
    /// The operation is handed its cancellation token; it receives [`TaskHandle::cancel`]
    /// requests through it. The factory is kept so [`TaskHandle::restart`] can resubmit
    /// the same operation.
    pub fn submit<F, Fut>(&self, op: F) -> TaskHandle
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let factory: Box<handle::OpFactory> = Box::new(move |token| Box::pin(op(token)));
        TaskHandle::spawn(self.runtime.clone(), factory)
    }

    /// Handle to the background runtime, for spawning long-lived coordination tasks
    /// (worker loops, supervisors) alongside submitted operations
    pub fn runtime(&self) -> &tokio::runtime::Handle {
        &self.runtime
    }

    /// Stop the background environment and join its thread. In-flight operations are
    /// dropped. Idempotent.
    pub fn shutdown(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn submit_and_wait_sync() {
        let bridge = ExecutionContext::new().unwrap();
        let handle = bridge.submit(|_cancel| async { Ok(json!(42)) });
        let value = handle.wait_sync(Duration::from_secs(5)).unwrap();
        assert_eq!(value, json!(42));
        assert!(handle.is_ready());
    }

    #[test]
    fn operation_error_is_captured_not_fatal() {
        let bridge = ExecutionContext::new().unwrap();
        let handle =
            bridge.submit(|_cancel| async { Err(BatchError::Operation("nope".into())) });
        let err = handle.wait_sync(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, BatchError::Operation(_)));

        // The environment survives and keeps accepting submissions.
        let handle = bridge.submit(|_cancel| async { Ok(json!("still alive")) });
        assert_eq!(
            handle.wait_sync(Duration::from_secs(5)).unwrap(),
            json!("still alive")
        );
    }

    #[test]
    fn panic_is_captured_as_failure() {
        let bridge = ExecutionContext::new().unwrap();
        let handle = bridge.submit(|_cancel| async { panic!("kaboom") });
        let err = handle.wait_sync(Duration::from_secs(5)).unwrap_err();
        match err {
            BatchError::Operation(message) => assert!(message.contains("kaboom")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cancel_resolves_to_cancelled() {
        let bridge = ExecutionContext::new().unwrap();
        let handle = bridge.submit(|cancel| async move {
            cancel.cancelled().await;
            Err(BatchError::Cancelled)
        });
        handle.cancel();
        let err = handle.wait_sync(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, BatchError::Cancelled));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let bridge = ExecutionContext::new().unwrap();
        bridge.shutdown();
        bridge.shutdown();
    }
}
