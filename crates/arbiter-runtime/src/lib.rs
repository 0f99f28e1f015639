//! `arbiter-runtime` – the tick loop and everything it decides with.
//!
//! Signals come in through `arbiter-middleware`, needs come out of
//! `arbiter-perception`, and every action leaves through the kernel's
//! capability gate. This crate sits in between and decides *what to do next*.
//!
//! # Modules
//!
//! - [`arbiter_loop`] – [`ArbiterLoop`][arbiter_loop::ArbiterLoop]: runs the
//!   ingest → arbitrate → route → preempt → dispatch → health sequence once
//!   per tick under per-phase budgets.
//! - [`context`] – [`TickContext`][context::TickContext]: the versioned,
//!   immutable value each tick starts from, including the decaying
//!   commitment table.
//! - [`goals`] – [`GoalLibrary`][goals::GoalLibrary],
//!   [`GoalEnumerator`][goals::GoalEnumerator] and
//!   [`FeasibilityChecker`][goals::FeasibilityChecker]: needs become goal
//!   candidates; resource gaps become `gather` subgoals.
//! - [`priority`] – [`PriorityRanker`][priority::PriorityRanker]: the
//!   deterministic scoring and tie-break order.
//! - [`router`] – [`CognitiveRouter`][router::CognitiveRouter] and the
//!   [`Planner`][router::Planner] trait: table-driven planner selection with
//!   cancellable, deadline-bounded invocation.
//! - [`planners`] – the reference planners of the degradation ladder:
//!   LLM, template, reactive and reflex.
//! - [`preemption`] – [`PreemptionLadder`][preemption::PreemptionLadder]:
//!   tiered task arbitration with resumable suspension.
//! - [`loop_guard`] – [`StallGuard`][loop_guard::StallGuard]: stops a
//!   repeatedly failing goal from hogging its commitment boost.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing] plus
//!   fire-and-forget bus publishing of tick records and alerts. Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to export spans to any OTLP collector.

pub mod arbiter_loop;
pub mod context;
pub mod goals;
pub mod loop_guard;
pub mod planners;
pub mod preemption;
pub mod priority;
pub mod router;
pub mod telemetry;

pub use arbiter_loop::{ArbiterHandles, ArbiterLoop, ArbiterLoopBuilder};
pub use context::{CommitmentTable, TickContext};
pub use goals::{FeasibilityChecker, GoalEnumerator, GoalLibrary, GoalTemplate, TierRule};
pub use loop_guard::StallGuard;
pub use planners::{LlmPlanner, ReactivePlanner, ReflexPlanner, TemplatePlanner};
pub use preemption::{PreemptionLadder, Submission, TaskState};
pub use priority::PriorityRanker;
pub use router::{CognitiveRouter, Planner, PlannerError, PlannerTier, PlanningTask};
pub use telemetry::{init_tracing, TracerProviderGuard};

// The gate is the runtime's only way out to the world; re-exported so
// callers driving the loop need no direct kernel dependency.
pub use arbiter_kernel::{CapabilityExecutor, CapabilityGate, ExecutorOutcome};
