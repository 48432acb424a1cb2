//! Operation dispatch
//!
//! The scheduling core places no constraint on what an operation does beyond "must
//! eventually return or observe cancellation". Operations are resolved by name through
//! an [`OperationRegistry`] built at startup, a registered-function table rather than
//! runtime reflection. Built-in operation kinds live in [`builtin`]; anything else is
//! registered by the embedding application, typically as a closure via
//! [`OperationRegistry::register_fn`].

pub mod builtin;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::{BatchError, Result};

/// A named unit of work taking a keyword-argument bag and returning a value or error
#[async_trait]
pub trait Operation: Send + Sync {
    /// The name tasks use to refer to this operation
    fn name(&self) -> &str;

    /// Run the operation. Long-running implementations should observe `cancel` at
    /// convenient points and bail out with [`BatchError::Cancelled`].
    async fn run(&self, params: Map<String, Value>, cancel: CancellationToken)
        -> Result<Value>;
}

/// Name-to-operation table built at startup
pub struct OperationRegistry {
    ops: HashMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in operations
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry);
        registry
    }

    /// Register an operation under its own name, replacing any previous registration
    pub fn register(&mut self, op: Arc<dyn Operation>) {
        self.ops.insert(op.name().to_string(), op);
    }

    /// Register a closure as an operation
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Map<String, Value>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let name = name.into();
        self.register(Arc::new(FunctionOperation {
            name,
            f: Box::new(move |params, cancel| Box::pin(f(params, cancel))),
        }));
    }

    /// Look up an operation by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.ops.get(name).cloned()
    }

    /// Names of all registered operations
    pub fn list(&self) -> Vec<String> {
        self.ops.keys().cloned().collect()
    }

    /// Resolve `name` and run it. An unknown name is an operation-level error: it flows
    /// through the worker's retry-then-fail path like any other failure.
    pub async fn invoke(
        &self,
        name: &str,
        params: Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let op = self
            .get(name)
            .ok_or_else(|| BatchError::UnknownOperation(name.to_string()))?;
        op.run(params, cancel).await
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a closure as an [`Operation`]
struct FunctionOperation {
    name: String,
    f: Box<
        dyn Fn(Map<String, Value>, CancellationToken) -> BoxFuture<'static, Result<Value>>
            + Send
            + Sync,
    >,
}

#[async_trait]
impl Operation for FunctionOperation {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        params: Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<Value> {
        (self.f)(params, cancel).await
    }
}
