//! Entrypoint invocation.
//!
//! Async capabilities are awaited on the calling task. Sync capabilities run
//! via `spawn_blocking`, gated by a semaphore so at most `blocking_workers`
//! of them occupy the blocking pool at once.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use skillgate_types::skill::SkillDescriptor;
use tokio::sync::Semaphore;
use tracing::debug;

use super::{Capability, CapabilityRegistry, CallContext, ExecutionFault};

pub struct EntrypointInvoker {
    registry: Arc<dyn CapabilityRegistry>,
    blocking: Arc<Semaphore>,
}

impl EntrypointInvoker {
    pub fn new(registry: Arc<dyn CapabilityRegistry>, blocking_workers: usize) -> Self {
        Self {
            registry,
            blocking: Arc::new(Semaphore::new(blocking_workers.max(1))),
        }
    }

    pub async fn invoke(
        &self,
        descriptor: &SkillDescriptor,
        payload: Value,
        ctx: &CallContext,
    ) -> Result<Value, ExecutionFault> {
        let skill_id = descriptor.id.to_string();
        let capability = self.registry.resolve(&descriptor.contract.entrypoint)?;
        debug!(
            skill_id = %skill_id,
            entrypoint = %descriptor.contract.entrypoint,
            request_id = %ctx.request_id,
            depth = ctx.depth(),
            "invoking entrypoint"
        );

        match capability {
            Capability::Sync(handler) => {
                let permit = Arc::clone(&self.blocking)
                    .acquire_owned()
                    .await
                    .map_err(|_| ExecutionFault::Cancelled {
                        skill_id: skill_id.clone(),
                    })?;
                let joined = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    handler(payload)
                })
                .await;
                match joined {
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(message)) => Err(ExecutionFault::Raised { skill_id, message }),
                    Err(e) if e.is_panic() => Err(ExecutionFault::Panicked { skill_id }),
                    Err(_) => Err(ExecutionFault::Cancelled { skill_id }),
                }
            }
            Capability::Async(handler) => {
                match AssertUnwindSafe(handler(payload)).catch_unwind().await {
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(message)) => Err(ExecutionFault::Raised { skill_id, message }),
                    Err(_) => Err(ExecutionFault::Panicked { skill_id }),
                }
            }
        }
    }
}
