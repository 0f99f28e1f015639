//! The capability executor interface.
//!
//! An executor turns an already-validated [`ExecutionRequest`] into world
//! effects. It performs no policy checks of its own; the gate has done that.
//! The gate wraps every call in the capability's hard timeout.

use async_trait::async_trait;
use arbiter_types::{ArbiterError, CapabilitySpec, Effect, ExecutionRequest};

/// What the executor reports back for one attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutorOutcome {
    pub success: bool,
    pub effects_applied: Vec<Effect>,
    /// Effects that undo `effects_applied`, most recent first.
    pub inverse: Vec<Effect>,
    pub message: Option<String>,
}

impl ExecutorOutcome {
    pub fn succeeded(effects_applied: Vec<Effect>, inverse: Vec<Effect>) -> Self {
        Self { success: true, effects_applied, inverse, message: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()), ..Default::default() }
    }
}

#[async_trait]
pub trait CapabilityExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        spec: &CapabilitySpec,
    ) -> Result<ExecutorOutcome, ArbiterError>;

    /// Re-apply an inverse effect list produced by an earlier execution.
    async fn compensate(&self, capability: &str, inverse: &[Effect]) -> Result<(), ArbiterError> {
        let _ = inverse;
        Err(ArbiterError::CapabilityExecutionFailure {
            capability: capability.to_string(),
            attempts: 0,
            reason: "executor does not support compensation".to_string(),
        })
    }
}
