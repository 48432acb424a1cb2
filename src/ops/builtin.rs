//! Built-in operations
//!
//! The small fixed set of operation kinds the core ships with, as a typed enum.
//! `simulate` exists mainly for testing and capacity planning: it sleeps for the given
//! duration and observes cancellation. `echo` returns its arguments unchanged.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use super::{Operation, OperationRegistry};
use crate::{BatchError, Result};

/// The built-in operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    /// Sleep for `duration` seconds (default 1.0), cancellation-aware
    Simulate,
    /// Return the keyword arguments as the result value
    Echo,
}

/// An [`Operation`] backed by a [`BuiltinKind`]
#[derive(Debug, Clone, Copy)]
pub struct BuiltinOperation {
    kind: BuiltinKind,
}

impl BuiltinOperation {
    /// Wrap a builtin kind
    pub fn new(kind: BuiltinKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Operation for BuiltinOperation {
    fn name(&self) -> &str {
        match self.kind {
            BuiltinKind::Simulate => "simulate",
            BuiltinKind::Echo => "echo",
        }
    }

    async fn run(
        &self,
        params: Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<Value> {
        match self.kind {
            BuiltinKind::Simulate => {
                let duration = params
                    .get("duration")
                    .and_then(Value::as_f64)
                    .unwrap_or(1.0)
                    .max(0.0);
                tokio::select! {
                    _ = cancel.cancelled() => Err(BatchError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs_f64(duration)) => {
                        Ok(json!({ "status": "simulated", "duration": duration }))
                    }
                }
            }
            BuiltinKind::Echo => Ok(Value::Object(params)),
        }
    }
}

/// Register every builtin into `registry`
pub fn register_builtins(registry: &mut OperationRegistry) {
    registry.register(std::sync::Arc::new(BuiltinOperation::new(
        BuiltinKind::Simulate,
    )));
    registry.register(std::sync::Arc::new(BuiltinOperation::new(BuiltinKind::Echo)));
}
