//! Human-approval stage.
//!
//! Capabilities tagged [`REQUIRES_APPROVAL_TAG`][arbiter_types::REQUIRES_APPROVAL_TAG]
//! must be approved before dispatch. The gate waits for the configured
//! [`ApprovalHook`] synchronously, but never longer than
//! `gate.approval_timeout_ms`; an unanswered request falls back to
//! `gate.approval_default`. Without a hook the default applies at once.

use async_trait::async_trait;
use arbiter_types::{CapabilitySpec, ExecutionRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied(String),
}

#[async_trait]
pub trait ApprovalHook: Send + Sync {
    async fn request_approval(&self, request: &ExecutionRequest, spec: &CapabilitySpec) -> ApprovalDecision;
}

/// Answers every request the same way. Useful for unattended runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticApprover {
    pub approve: bool,
}

#[async_trait]
impl ApprovalHook for StaticApprover {
    async fn request_approval(&self, request: &ExecutionRequest, _spec: &CapabilitySpec) -> ApprovalDecision {
        if self.approve {
            ApprovalDecision::Approved
        } else {
            ApprovalDecision::Denied(format!("{} not approved by operator", request.capability))
        }
    }
}
