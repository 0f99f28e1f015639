//! `arbiter-kernel` – safety and enforcement.
//!
//! The kernel does not decide what the agent wants; it decides what the agent
//! is *allowed* to do and how much of the system is currently trusted.
//!
//! # Modules
//!
//! - [`capability_registry`] – [`CapabilityRegistry`][capability_registry::CapabilityRegistry]:
//!   the read-only capability table registered at startup, with
//!   per-capability cooldown and concurrency counters each behind their own
//!   lock.
//! - [`policy`] – [`PolicyEngine`][policy::PolicyEngine]: evaluates
//!   constitutional rules against goals and actions and folds the verdicts
//!   into one decision with a full reasoning trace.
//! - [`rollback`] – [`RollbackJournal`][rollback::RollbackJournal]: records
//!   inverse effects of reversible executions; rolling back a token twice is
//!   a no-op.
//! - [`approval`] – [`ApprovalHook`][approval::ApprovalHook]: the synchronous,
//!   budgeted human-approval stage.
//! - [`executor`] – [`CapabilityExecutor`][executor::CapabilityExecutor]: the
//!   consumed interface that turns an approved request into world effects.
//! - [`gate`] – [`CapabilityGate`][gate::CapabilityGate]: the single
//!   interception point every action passes through before dispatch.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: component heartbeats.
//! - [`degradation`] – [`DegradationController`][degradation::DegradationController]:
//!   the `FULL → … → SAFE_MODE` state machine.

pub mod approval;
pub mod capability_registry;
pub mod degradation;
pub mod executor;
pub mod gate;
pub mod policy;
pub mod rollback;
pub mod watchdog;

pub use approval::{ApprovalDecision, ApprovalHook, StaticApprover};
pub use capability_registry::{CapabilityRegistry, RatePermit};
pub use degradation::{DegradationController, TickHealth, Transition};
pub use executor::{CapabilityExecutor, ExecutorOutcome};
pub use gate::{Admission, CapabilityGate, RollbackOutcome};
pub use policy::{PolicyDecision, PolicyEngine, PolicyRule, PolicySubject, SAFE_MODE_RULE_ID};
pub use rollback::RollbackJournal;
pub use watchdog::{ComponentHealth, Watchdog};
