//! Capability resolution and invocation.
//!
//! The core only sees [`CapabilityRegistry::resolve`]; how entrypoints are
//! bound to code is up to the registry. [`DispatchTable`] is the compiled
//! in-process variant.

pub mod context;
pub mod invoker;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

pub use context::CallContext;
pub use invoker::EntrypointInvoker;

/// An entrypoint failed. Counted by the circuit breaker, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionFault {
    #[error("cannot resolve entrypoint '{entrypoint}': {reason}")]
    Resolution { entrypoint: String, reason: String },

    #[error("skill '{skill_id}' failed: {message}")]
    Raised { skill_id: String, message: String },

    #[error("skill '{skill_id}' panicked")]
    Panicked { skill_id: String },

    #[error("skill '{skill_id}' was cancelled")]
    Cancelled { skill_id: String },
}

type SyncHandler = dyn Fn(Value) -> Result<Value, String> + Send + Sync;
type AsyncHandler = dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync;

/// A resolved, callable entrypoint.
#[derive(Clone)]
pub enum Capability {
    /// Runs on the bounded blocking pool.
    Sync(Arc<SyncHandler>),
    /// Awaited on the caller's task.
    Async(Arc<AsyncHandler>),
}

impl Capability {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Self::Async(Arc::new(move |payload| f(payload).boxed()))
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Capability::Sync"),
            Self::Async(_) => f.write_str("Capability::Async"),
        }
    }
}

pub trait CapabilityRegistry: Send + Sync {
    fn resolve(&self, entrypoint: &str) -> Result<Capability, ExecutionFault>;
}

/// Entrypoint table built at compile time or startup.
#[derive(Debug, Default)]
pub struct DispatchTable {
    entries: DashMap<String, Capability>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entrypoint: impl Into<String>, capability: Capability) -> &Self {
        self.entries.insert(entrypoint.into(), capability);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CapabilityRegistry for DispatchTable {
    fn resolve(&self, entrypoint: &str) -> Result<Capability, ExecutionFault> {
        let well_formed = entrypoint
            .split_once(':')
            .is_some_and(|(module, function)| !module.is_empty() && !function.is_empty());
        if !well_formed {
            return Err(ExecutionFault::Resolution {
                entrypoint: entrypoint.to_string(),
                reason: "expected module:function".into(),
            });
        }
        self.entries
            .get(entrypoint)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ExecutionFault::Resolution {
                entrypoint: entrypoint.to_string(),
                reason: "not registered".into(),
            })
    }
}
