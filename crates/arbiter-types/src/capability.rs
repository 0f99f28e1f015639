//! Capabilities, execution requests and gate verdicts.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::goal::Action;
use crate::world::{Condition, Effect};

/// Declared risk of a capability; compared against the sandbox threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Safety tag that routes a capability through the human-approval stage.
pub const REQUIRES_APPROVAL_TAG: &str = "requires_approval";

/// A registered, typed, policy-gated action. Read-only after startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub id: String,
    #[serde(default)]
    pub preconditions: Vec<Condition>,
    #[serde(default)]
    pub effects: Vec<Effect>,
    #[serde(default)]
    pub cost_hint: f64,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub safety_tags: Vec<String>,
    #[serde(default)]
    pub cooldown_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default)]
    pub reversible: bool,
    #[serde(default)]
    pub idempotent: bool,
    /// Hard executor timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_max_concurrent() -> u32 {
    1
}

fn default_timeout_ms() -> u64 {
    50
}

impl CapabilitySpec {
    /// A low-risk capability with no preconditions, effects or rate limit.
    pub fn new(id: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            id: id.into(),
            preconditions: Vec::new(),
            effects: Vec::new(),
            cost_hint: 1.0,
            risk_level,
            safety_tags: Vec::new(),
            cooldown_ms: 0,
            max_concurrent: default_max_concurrent(),
            reversible: false,
            idempotent: false,
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn with_precondition(mut self, condition: Condition) -> Self {
        self.preconditions.push(condition);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: u32) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.safety_tags.push(tag.into());
        self
    }

    pub fn reversible(mut self) -> Self {
        self.reversible = true;
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.safety_tags.iter().any(|t| t == tag)
    }
}

/// Immutable request to run one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub id: Uuid,
    pub capability: String,
    pub goal_id: Option<Uuid>,
    pub params: BTreeMap<String, f64>,
    /// Step-level preconditions, checked in addition to the capability's own.
    pub preconditions: Vec<Condition>,
    /// Effects the caller expects; the capability's declared effects are
    /// appended by the executor.
    pub effects: Vec<Effect>,
    pub tags: Vec<String>,
    pub requester: String,
    pub requested_at: DateTime<Utc>,
}

impl ExecutionRequest {
    pub fn new(capability: impl Into<String>, requester: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            capability: capability.into(),
            goal_id: None,
            params: BTreeMap::new(),
            preconditions: Vec::new(),
            effects: Vec::new(),
            tags: Vec::new(),
            requester: requester.into(),
            requested_at: Utc::now(),
        }
    }

    /// Build the request for one plan step.
    pub fn from_action(action: &Action, goal_id: Uuid, requester: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            capability: action.capability.clone(),
            goal_id: Some(goal_id),
            params: action.params.clone(),
            preconditions: action.preconditions.clone(),
            effects: action.effects.clone(),
            tags: Vec::new(),
            requester: requester.into(),
            requested_at: Utc::now(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: f64) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Handle for undoing a reversible execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RollbackToken(pub Uuid);

impl fmt::Display for RollbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rb-{}", self.0)
    }
}

/// Result of a dispatched execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub request_id: Uuid,
    pub capability: String,
    pub success: bool,
    pub effects_applied: Vec<Effect>,
    pub rollback_token: Option<RollbackToken>,
    pub duration_ms: f64,
    pub attempts: u32,
    /// Warnings attached by `FLAG` verdicts under standard enforcement.
    pub warnings: Vec<String>,
    /// When the gate admitted the execution (after the rate-limit check).
    pub admitted_at: Instant,
}

/// Decision of a single policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Modify,
    Flag,
    Deny,
    Escalate,
}

impl Verdict {
    /// Severity used to fold multiple verdicts into one.
    pub fn severity(&self) -> u8 {
        match self {
            Verdict::Allow => 0,
            Verdict::Modify => 1,
            Verdict::Flag => 2,
            Verdict::Escalate => 3,
            Verdict::Deny => 4,
        }
    }

    /// `DENY` and `ESCALATE` block under every enforcement mode.
    pub fn always_blocks(&self) -> bool {
        matches!(self, Verdict::Deny | Verdict::Escalate)
    }
}

/// How strictly non-blocking verdicts are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Only `ALLOW` and auto-corrected `MODIFY` proceed.
    Strict,
    /// `FLAG` additionally proceeds with a warning.
    #[default]
    Standard,
}

/// Gate pipeline stage, reported with every rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStage {
    Precondition,
    Policy,
    RateLimit,
    Sandbox,
    Approval,
    Execution,
}

impl fmt::Display for GateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateStage::Precondition => "precondition",
            GateStage::Policy => "policy",
            GateStage::RateLimit => "rate_limit",
            GateStage::Sandbox => "sandbox",
            GateStage::Approval => "approval",
            GateStage::Execution => "execution",
        };
        f.write_str(s)
    }
}

/// One line of the policy reasoning trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub rule_id: String,
    pub verdict: Verdict,
    pub reason: String,
}

/// Structured explanation of why the gate refused something.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    /// Capability id or goal key that was refused.
    pub subject: String,
    pub stage: GateStage,
    pub rule_id: Option<String>,
    pub reason: String,
    pub trace: Vec<RuleEvaluation>,
}

impl Rejection {
    pub fn new(subject: impl Into<String>, stage: GateStage, reason: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            stage,
            rule_id: None,
            reason: reason.into(),
            trace: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    pub fn with_trace(mut self, trace: Vec<RuleEvaluation>) -> Self {
        self.trace = trace;
        self
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rejected at {} stage: {}", self.subject, self.stage, self.reason)?;
        if let Some(rule) = &self.rule_id {
            write!(f, " (rule {rule})")?;
        }
        Ok(())
    }
}

/// Operational level of the degradation state machine, from most to least
/// capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    #[default]
    Full,
    DegradedReasoning,
    DegradedPlanning,
    Basic,
    SafeMode,
}

impl DegradationLevel {
    /// One step less capable; `SafeMode` is terminal.
    pub fn step_down(&self) -> Self {
        match self {
            DegradationLevel::Full => DegradationLevel::DegradedReasoning,
            DegradationLevel::DegradedReasoning => DegradationLevel::DegradedPlanning,
            DegradationLevel::DegradedPlanning => DegradationLevel::Basic,
            DegradationLevel::Basic | DegradationLevel::SafeMode => DegradationLevel::SafeMode,
        }
    }

    /// One step more capable; `Full` is terminal.
    pub fn step_up(&self) -> Self {
        match self {
            DegradationLevel::Full | DegradationLevel::DegradedReasoning => DegradationLevel::Full,
            DegradationLevel::DegradedPlanning => DegradationLevel::DegradedReasoning,
            DegradationLevel::Basic => DegradationLevel::DegradedPlanning,
            DegradationLevel::SafeMode => DegradationLevel::Basic,
        }
    }
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DegradationLevel::Full => "FULL",
            DegradationLevel::DegradedReasoning => "DEGRADED(reasoning)",
            DegradationLevel::DegradedPlanning => "DEGRADED(planning)",
            DegradationLevel::Basic => "BASIC",
            DegradationLevel::SafeMode => "SAFE_MODE",
        };
        f.write_str(s)
    }
}
