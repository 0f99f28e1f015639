use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::{GateStage, Rejection};
use crate::goal::Deficit;

/// Error taxonomy shared by every arbiter crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArbiterError {
    /// Recovered locally by turning deficits into subgoals.
    #[error("Infeasible goal {goal}: {} unmet deficit(s)", .deficits.len())]
    InfeasibleGoal { goal: String, deficits: Vec<Deficit> },

    /// Recovered by trying the next-ranked planner or a fallback tier.
    #[error("Routing timeout: planner '{module}' exceeded its {budget_ms} ms deadline")]
    RoutingTimeout { module: String, budget_ms: u64 },

    #[error("Routing failed for {goal}: {reason}")]
    RoutingFailed { goal: String, reason: String },

    /// Always surfaced; never auto-retried.
    #[error("Policy violation: {0}")]
    PolicyViolation(Rejection),

    /// Non-policy gate rejection (precondition, rate limit, sandbox, approval).
    #[error("Rejected: {0}")]
    Rejected(Rejection),

    #[error("Capability '{capability}' failed after {attempts} attempt(s): {reason}")]
    CapabilityExecutionFailure {
        capability: String,
        attempts: u32,
        reason: String,
    },

    /// Fatal to the current tick only.
    #[error("Watchdog timeout in {phase} phase: {elapsed_ms:.2} ms exceeds {budget_ms} ms budget")]
    WatchdogTimeout {
        phase: String,
        elapsed_ms: f64,
        budget_ms: u64,
    },

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Preemption error: {0}")]
    Preemption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ArbiterError {
    /// Wrap a gate rejection, keeping policy refusals distinguishable.
    pub fn from_rejection(rejection: Rejection) -> Self {
        if rejection.stage == GateStage::Policy {
            ArbiterError::PolicyViolation(rejection)
        } else {
            ArbiterError::Rejected(rejection)
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ArbiterError::PolicyViolation(r) | ArbiterError::Rejected(r) => Some(r),
            _ => None,
        }
    }

    /// Errors the watchdog counts as timeouts rather than generic failures.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ArbiterError::RoutingTimeout { .. } | ArbiterError::WatchdogTimeout { .. }
        )
    }
}
