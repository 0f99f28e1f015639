//! `arbiter-types` – shared data model for the signal-driven arbiter.
//!
//! Every other crate in the workspace speaks these types: signals and need
//! scores, goal candidates and plans, capability specs and gate verdicts,
//! the configuration contract, the error taxonomy, and the envelope used on
//! the event bus.

pub mod capability;
pub mod config;
pub mod error;
pub mod goal;
pub mod signal;
pub mod world;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use capability::{
    CapabilitySpec, DegradationLevel, EnforcementMode, ExecutionRequest, ExecutionResult,
    GateStage, Rejection, RiskLevel, RollbackToken, RuleEvaluation, Verdict,
    REQUIRES_APPROVAL_TAG,
};
pub use config::ArbiterConfig;
pub use error::ArbiterError;
pub use goal::{
    goal_key, Action, Bindings, BudgetClass, Deficit, Feasibility, GoalCandidate, GoalOrigin,
    GoalProposal, Plan, PriorityTier, TaskSignature,
};
pub use signal::{NeedKind, NeedScore, Provenance, RawSignal, Signal, Trend};
pub use world::{Comparison, Condition, Effect, WorldState};

/// Envelope for everything published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"arbiter-runtime::arbiter_loop"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Per-tick monitoring record.
    Tick(TickTelemetry),
    /// A gate or goal-screen rejection, with its full reasoning trace.
    Rejected(Rejection),
    /// The degradation controller changed level.
    Degradation {
        from: DegradationLevel,
        to: DegradationLevel,
        reason: String,
    },
    /// A running task was suspended by a higher-tier request.
    Preempted {
        task: Uuid,
        by: Uuid,
        overhead_ms: f64,
    },
    /// A component missed its heartbeat or misbehaved.
    ComponentFault { component: String, message: String },
}

/// Telemetry emitted once per tick. Delivery is fire-and-forget.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickTelemetry {
    pub tick: u64,
    pub context_version: u64,
    /// Latency per phase in milliseconds, keyed by phase name.
    pub latency_ms: BTreeMap<String, f64>,
    pub selected_goal: Option<String>,
    pub selected_module: Option<String>,
    pub preemption_count: u64,
    pub safe_mode_state: DegradationLevel,
    pub rejections: Vec<Rejection>,
    /// Set when the tick was aborted by a watchdog timeout.
    pub aborted: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_roundtrip() {
        let mut telemetry = TickTelemetry { tick: 7, ..Default::default() };
        telemetry.latency_ms.insert("routing".into(), 1.25);
        let event = Event::new("arbiter-runtime::arbiter_loop", EventPayload::Tick(telemetry));
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        match back.payload {
            EventPayload::Tick(t) => assert_eq!(t.tick, 7),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn arbiter_error_display() {
        let err = ArbiterError::RoutingTimeout { module: "llm".into(), budget_ms: 20 };
        assert!(err.to_string().contains("llm"));
        assert!(err.is_timeout());

        let err = ArbiterError::PolicyViolation(
            Rejection::new("attack_player", GateStage::Policy, "denied").with_rule("no-pvp"),
        );
        assert!(err.to_string().contains("no-pvp"));
        assert!(!err.is_timeout());
    }

    #[test]
    fn default_config_is_valid() {
        ArbiterConfig::default().validate().expect("bundled config must validate");
    }

    #[test]
    fn config_parses_from_partial_toml() {
        let raw = r#"
            tick_period_ms = 100

            [policy]
            enforcement = "strict"

            [[policy.rules]]
            id = "no-lava"
            description = "never walk into lava"
            applies_to = "action"
            verdict = "deny"
            [policy.rules.matcher]
            names = ["walk_into_lava"]
        "#;
        let cfg: ArbiterConfig = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.tick_period_ms, 100);
        assert_eq!(cfg.policy.enforcement, EnforcementMode::Strict);
        assert_eq!(cfg.policy.rules.len(), 1);
        assert_eq!(cfg.policy.rules[0].verdict, Verdict::Deny);
        // Untouched sections keep their defaults.
        assert!(!cfg.capabilities.is_empty());
        assert_eq!(cfg.budgets.emergency.total_ms(), 70);
    }

    #[test]
    fn config_validation_rejects_duplicate_capabilities() {
        let mut cfg = ArbiterConfig::default();
        cfg.capabilities.push(CapabilitySpec::new("flee", RiskLevel::Low));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_validation_rejects_zero_limits() {
        let mut cfg = ArbiterConfig::default();
        cfg.preemption.queue_limit = 0;
        assert!(cfg.validate().unwrap_err().contains("queue_limit"));

        let mut cfg = ArbiterConfig::default();
        cfg.watchdog.timeout_threshold = 0;
        assert!(cfg.validate().unwrap_err().contains("timeout_threshold"));

        let mut cfg = ArbiterConfig::default();
        cfg.watchdog.restore_after_ticks = 0;
        assert!(cfg.validate().unwrap_err().contains("restore_after_ticks"));
    }
}
