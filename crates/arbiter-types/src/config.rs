//! Externally loaded configuration contract.
//!
//! Every threshold, budget, routing rule and policy the arbiter uses comes
//! from an [`ArbiterConfig`]. The `Default` impl describes the bundled demo
//! world; production deployments load their own file.

use serde::{Deserialize, Serialize};

use crate::capability::{CapabilitySpec, EnforcementMode, RiskLevel, Verdict, REQUIRES_APPROVAL_TAG};
use crate::goal::{BudgetClass, PriorityTier, TaskSignature};
use crate::signal::NeedKind;
use crate::world::{Condition, Effect};

// ─────────────────────────────────────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    pub tick_period_ms: u64,
    pub budgets: BudgetTable,
    pub routing: Vec<RoutingRule>,
    pub needs: NeedConfig,
    pub ranking: RankingConfig,
    pub preemption: PreemptionConfig,
    pub capabilities: Vec<CapabilitySpec>,
    pub policy: PolicyConfig,
    pub gate: GateConfig,
    pub watchdog: WatchdogConfig,
    pub inbox: InboxConfig,
    pub signals: SignalConfig,
    pub llm: LlmConfig,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 250,
            budgets: BudgetTable::default(),
            routing: default_routing(),
            needs: NeedConfig::default(),
            ranking: RankingConfig::default(),
            preemption: PreemptionConfig::default(),
            capabilities: default_capabilities(),
            policy: PolicyConfig::default(),
            gate: GateConfig::default(),
            watchdog: WatchdogConfig::default(),
            inbox: InboxConfig::default(),
            signals: SignalConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl ArbiterConfig {
    /// Check cross-field consistency that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        for rule in &self.routing {
            if !(0.0..=1.0).contains(&rule.confidence) {
                return Err(format!(
                    "routing rule for module '{}' has confidence {} outside [0, 1]",
                    rule.module, rule.confidence
                ));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for cap in &self.capabilities {
            if !seen.insert(cap.id.as_str()) {
                return Err(format!("capability '{}' registered twice", cap.id));
            }
            if cap.max_concurrent == 0 {
                return Err(format!("capability '{}' has max_concurrent = 0", cap.id));
            }
        }
        for id in &self.policy.safe_mode_allow_list {
            if !seen.contains(id.as_str()) {
                return Err(format!("safe-mode allow-list names unknown capability '{id}'"));
            }
        }
        if self.ranking.commitment_decay < 0.0 || self.ranking.commitment_decay >= 1.0 {
            return Err("ranking.commitment_decay must be in [0, 1)".to_string());
        }
        if self.preemption.queue_limit == 0 {
            return Err("preemption.queue_limit must be at least 1".to_string());
        }
        if self.watchdog.timeout_threshold == 0 {
            return Err("watchdog.timeout_threshold must be at least 1".to_string());
        }
        if self.watchdog.restore_after_ticks == 0 {
            return Err("watchdog.restore_after_ticks must be at least 1".to_string());
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Budgets
// ─────────────────────────────────────────────────────────────────────────────

/// Per-phase latency budget. The phases sum to the tick's total budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceBudget {
    pub signal_ms: u64,
    pub arbitration_ms: u64,
    pub routing_ms: u64,
    pub execution_ms: u64,
}

impl PerformanceBudget {
    pub fn total_ms(&self) -> u64 {
        self.signal_ms + self.arbitration_ms + self.routing_ms + self.execution_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetTable {
    pub emergency: PerformanceBudget,
    pub routine: PerformanceBudget,
    pub deliberative: PerformanceBudget,
}

impl Default for BudgetTable {
    fn default() -> Self {
        Self {
            emergency: PerformanceBudget { signal_ms: 5, arbitration_ms: 5, routing_ms: 20, execution_ms: 40 },
            routine: PerformanceBudget { signal_ms: 10, arbitration_ms: 15, routing_ms: 75, execution_ms: 100 },
            deliberative: PerformanceBudget { signal_ms: 10, arbitration_ms: 15, routing_ms: 1500, execution_ms: 200 },
        }
    }
}

impl BudgetTable {
    pub fn for_class(&self, class: BudgetClass) -> PerformanceBudget {
        match class {
            BudgetClass::Emergency => self.emergency,
            BudgetClass::Routine => self.routine,
            BudgetClass::Deliberative => self.deliberative,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Routing
// ─────────────────────────────────────────────────────────────────────────────

/// Partial task signature; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignaturePattern {
    pub need: Option<NeedKind>,
    pub tier: Option<PriorityTier>,
    pub template: Option<String>,
    pub class: Option<BudgetClass>,
}

impl SignaturePattern {
    pub fn matches(&self, sig: &TaskSignature) -> bool {
        self.need.is_none_or(|n| n == sig.need)
            && self.tier.is_none_or(|t| t == sig.tier)
            && self.template.as_deref().is_none_or(|t| t == sig.template)
            && self.class.is_none_or(|c| c == sig.class)
    }

    /// Number of constrained fields; more specific rules win ties.
    pub fn specificity(&self) -> usize {
        [
            self.need.is_some(),
            self.tier.is_some(),
            self.template.is_some(),
            self.class.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count()
    }
}

/// Task signature → reasoning module, with a confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    #[serde(default)]
    pub signature: SignaturePattern,
    pub module: String,
    pub confidence: f64,
}

impl RoutingRule {
    pub fn new(signature: SignaturePattern, module: impl Into<String>, confidence: f64) -> Self {
        Self { signature, module: module.into(), confidence }
    }
}

fn default_routing() -> Vec<RoutingRule> {
    let safety = SignaturePattern { need: Some(NeedKind::Safety), ..Default::default() };
    let routine = SignaturePattern { class: Some(BudgetClass::Routine), ..Default::default() };
    let deliberative = SignaturePattern { class: Some(BudgetClass::Deliberative), ..Default::default() };
    vec![
        RoutingRule::new(safety.clone(), "llm", 0.9),
        RoutingRule::new(safety, "reactive", 0.7),
        RoutingRule::new(routine.clone(), "template", 0.8),
        RoutingRule::new(routine.clone(), "llm", 0.6),
        RoutingRule::new(routine, "reactive", 0.5),
        RoutingRule::new(deliberative.clone(), "llm", 0.9),
        RoutingRule::new(deliberative, "template", 0.7),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Needs
// ─────────────────────────────────────────────────────────────────────────────

/// Contribution of one signal to one need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedMapping {
    pub signal: String,
    pub need: NeedKind,
    pub weight: f64,
}

/// Multiplies a need when a context signal is at or above `threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextGate {
    pub context_signal: String,
    pub threshold: f64,
    pub need: NeedKind,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeedConfig {
    pub mappings: Vec<NeedMapping>,
    pub context_gates: Vec<ContextGate>,
    /// Needs below this score do not enumerate goals.
    pub activation_threshold: f64,
}

impl Default for NeedConfig {
    fn default() -> Self {
        let m = |signal: &str, need, weight| NeedMapping { signal: signal.to_string(), need, weight };
        Self {
            mappings: vec![
                m("hostile_proximity", NeedKind::Safety, 0.7),
                m("damage_taken", NeedKind::Safety, 0.3),
                m("darkness", NeedKind::Safety, 0.1),
                m("hunger", NeedKind::Nutrition, 0.8),
                m("health_loss", NeedKind::Nutrition, 0.2),
                m("unfinished_work", NeedKind::Progress, 0.6),
                m("resource_scarcity", NeedKind::Progress, 0.4),
                m("isolation", NeedKind::Social, 0.7),
                m("chat_activity", NeedKind::Social, 0.3),
                m("unexplored_area", NeedKind::Curiosity, 0.8),
                m("boredom", NeedKind::Curiosity, 0.2),
                m("tool_wear", NeedKind::Integrity, 0.6),
                m("structure_damage", NeedKind::Integrity, 0.4),
            ],
            context_gates: vec![
                ContextGate {
                    context_signal: "night".to_string(),
                    threshold: 0.5,
                    need: NeedKind::Safety,
                    multiplier: 1.5,
                },
                ContextGate {
                    context_signal: "night".to_string(),
                    threshold: 0.5,
                    need: NeedKind::Curiosity,
                    multiplier: 0.5,
                },
            ],
            activation_threshold: 0.15,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ranking
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Boost granted to a goal when a plan for it is dispatched.
    pub commitment_boost: f64,
    /// Multiplicative decay applied to every boost once per tick.
    pub commitment_decay: f64,
    /// Boosts below this are dropped.
    pub commitment_epsilon: f64,
    /// Scales the parent need score for feasibility-generated subgoals.
    pub subgoal_discount: f64,
    /// Weight applied to a template's cost to obtain its opportunity cost.
    pub opportunity_cost_weight: f64,
    pub max_subgoal_depth: u8,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            commitment_boost: 0.15,
            commitment_decay: 0.7,
            commitment_epsilon: 0.01,
            subgoal_discount: 0.9,
            opportunity_cost_weight: 0.02,
            max_subgoal_depth: 1,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Preemption
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreemptionConfig {
    /// Hard SLA for stopping a task and capturing its state.
    pub overhead_budget_ms: f64,
    /// Maximum number of queued (including preempted) tasks.
    pub queue_limit: usize,
}

impl Default for PreemptionConfig {
    fn default() -> Self {
        Self { overhead_budget_ms: 5.0, queue_limit: 16 }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// What a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSubject {
    Goal,
    Action,
    #[default]
    Any,
}

/// Upper bound on a numeric request parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamLimit {
    pub param: String,
    pub max: f64,
}

/// Which subjects a rule fires on. Empty lists match anything; every
/// populated criterion must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleMatcher {
    /// Capability ids or goal templates; a trailing `*` matches a prefix.
    pub names: Vec<String>,
    /// The subject must carry at least one of these tags.
    pub tags: Vec<String>,
    pub min_risk: Option<RiskLevel>,
    pub param_above: Option<ParamLimit>,
}

/// A constitutional rule loaded from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionalRule {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub applies_to: RuleSubject,
    #[serde(default)]
    pub matcher: RuleMatcher,
    pub verdict: Verdict,
    /// Correction applied for `MODIFY` verdicts.
    #[serde(default)]
    pub correction: Option<ParamLimit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub enforcement: EnforcementMode,
    pub rules: Vec<ConstitutionalRule>,
    /// Capabilities still permitted in safe mode.
    pub safe_mode_allow_list: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enforcement: EnforcementMode::Standard,
            rules: vec![
                ConstitutionalRule {
                    id: "no-pvp".to_string(),
                    description: "never attack other players".to_string(),
                    applies_to: RuleSubject::Any,
                    matcher: RuleMatcher { names: vec!["attack_player".to_string()], ..Default::default() },
                    verdict: Verdict::Deny,
                    correction: None,
                },
                ConstitutionalRule {
                    id: "no-griefing".to_string(),
                    description: "never destroy structures built by others".to_string(),
                    applies_to: RuleSubject::Goal,
                    matcher: RuleMatcher { names: vec!["destroy_*".to_string()], ..Default::default() },
                    verdict: Verdict::Deny,
                    correction: None,
                },
                ConstitutionalRule {
                    id: "self-modification-review".to_string(),
                    description: "changes to the agent's own code require review".to_string(),
                    applies_to: RuleSubject::Any,
                    matcher: RuleMatcher { tags: vec!["self_modification".to_string()], ..Default::default() },
                    verdict: Verdict::Escalate,
                    correction: None,
                },
                ConstitutionalRule {
                    id: "flee-speed-cap".to_string(),
                    description: "sprinting is capped to avoid falling damage".to_string(),
                    applies_to: RuleSubject::Action,
                    matcher: RuleMatcher {
                        names: vec!["flee".to_string()],
                        param_above: Some(ParamLimit { param: "speed".to_string(), max: 1.0 }),
                        ..Default::default()
                    },
                    verdict: Verdict::Modify,
                    correction: Some(ParamLimit { param: "speed".to_string(), max: 1.0 }),
                },
                ConstitutionalRule {
                    id: "high-risk-notice".to_string(),
                    description: "high-risk actions are flagged for audit".to_string(),
                    applies_to: RuleSubject::Action,
                    matcher: RuleMatcher { min_risk: Some(RiskLevel::High), ..Default::default() },
                    verdict: Verdict::Flag,
                    correction: None,
                },
            ],
            safe_mode_allow_list: vec!["flee".to_string(), "hide".to_string(), "wait".to_string()],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Gate
// ─────────────────────────────────────────────────────────────────────────────

/// What happens when a human approver does not answer in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDefault {
    #[default]
    Deny,
    Allow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Highest risk level the sandbox admits.
    pub max_risk: RiskLevel,
    /// Extra attempts for idempotent capabilities.
    pub execution_retries: u32,
    pub approval_timeout_ms: u64,
    pub approval_default: ApprovalDefault,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_risk: RiskLevel::High,
            execution_retries: 2,
            approval_timeout_ms: 20,
            approval_default: ApprovalDefault::Deny,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Watchdog
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Sliding window (in ticks) over which health is evaluated.
    pub window_ticks: usize,
    /// Timeouts within the window that trigger one degradation step.
    pub timeout_threshold: u32,
    /// Fraction of erroring ticks within the window that triggers a step.
    pub error_rate_threshold: f64,
    /// Resource pressure at or above which the arbiter drops to safe mode.
    pub resource_exhaustion_threshold: f64,
    /// Consecutive healthy ticks required before restoring one level.
    pub restore_after_ticks: u32,
    /// Default heartbeat deadline for registered components.
    pub component_timeout_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            window_ticks: 20,
            timeout_threshold: 3,
            error_rate_threshold: 0.5,
            resource_exhaustion_threshold: 0.95,
            restore_after_ticks: 40,
            component_timeout_ms: 5_000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingestion
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    /// Sustained rate of accepted external goal proposals.
    pub proposals_per_second: u32,
    pub capacity: usize,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self { proposals_per_second: 5, capacity: 32 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Bound of the ingestion channel; overflow rejects the newest signal.
    pub channel_capacity: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self { channel_capacity: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    /// Typical response latency used for routing estimates.
    pub expected_latency_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            expected_latency_ms: 800,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Demo capability table
// ─────────────────────────────────────────────────────────────────────────────

fn default_capabilities() -> Vec<CapabilitySpec> {
    vec![
        CapabilitySpec::new("flee", RiskLevel::Low).idempotent(),
        CapabilitySpec::new("hide", RiskLevel::Low)
            .with_effect(Effect::Set { fact: "hidden".into(), value: 1.0 })
            .reversible(),
        CapabilitySpec::new("wait", RiskLevel::Low).idempotent(),
        CapabilitySpec::new("defend", RiskLevel::High).with_cooldown_ms(500),
        CapabilitySpec::new("eat", RiskLevel::Low)
            .with_precondition(Condition::gte("food", 1.0))
            .with_effect(Effect::Add { fact: "food".into(), delta: -1.0 })
            .with_effect(Effect::Add { fact: "satiety".into(), delta: 0.3 })
            .with_cooldown_ms(1_000),
        CapabilitySpec::new("gather_food", RiskLevel::Low)
            .with_effect(Effect::Add { fact: "food".into(), delta: 1.0 })
            .with_cooldown_ms(200)
            .with_max_concurrent(2)
            .reversible(),
        CapabilitySpec::new("gather_wood", RiskLevel::Low)
            .with_effect(Effect::Add { fact: "wood".into(), delta: 1.0 })
            .with_cooldown_ms(200)
            .with_max_concurrent(2)
            .reversible(),
        CapabilitySpec::new("craft_tool", RiskLevel::Medium)
            .with_precondition(Condition::gte("wood", 2.0))
            .with_effect(Effect::Add { fact: "wood".into(), delta: -2.0 })
            .with_effect(Effect::Set { fact: "tool_condition".into(), value: 1.0 })
            .reversible(),
        CapabilitySpec::new("build", RiskLevel::Medium)
            .with_precondition(Condition::gte("wood", 4.0))
            .with_effect(Effect::Add { fact: "wood".into(), delta: -4.0 })
            .with_effect(Effect::Add { fact: "structures".into(), delta: 1.0 })
            .reversible(),
        CapabilitySpec::new("repair", RiskLevel::Low)
            .with_precondition(Condition::gte("wood", 1.0))
            .with_effect(Effect::Add { fact: "wood".into(), delta: -1.0 })
            .with_effect(Effect::Set { fact: "structure_integrity".into(), value: 1.0 }),
        CapabilitySpec::new("explore", RiskLevel::Medium)
            .with_effect(Effect::Add { fact: "explored".into(), delta: 1.0 })
            .with_cooldown_ms(500),
        CapabilitySpec::new("socialize", RiskLevel::Low).with_cooldown_ms(2_000),
        CapabilitySpec::new("attack_player", RiskLevel::Critical),
        CapabilitySpec::new("self_update", RiskLevel::High).with_tag(REQUIRES_APPROVAL_TAG),
    ]
}
