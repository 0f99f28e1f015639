//! Goals, plans and the actions they are made of.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::NeedKind;
use crate::world::{Condition, Effect};

/// Preemption tier. Numerically lower tiers outrank higher ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    SafetyReflex = 0,
    SafetyInterrupt = 1,
    GoalCompletion = 2,
    Exploration = 3,
    Idle = 4,
}

impl PriorityTier {
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// `true` when a request at `self` may preempt a task running at
    /// `running`; only strictly higher tiers preempt.
    pub fn preempts(&self, running: PriorityTier) -> bool {
        self.rank() < running.rank()
    }

    pub fn is_safety(&self) -> bool {
        matches!(self, PriorityTier::SafetyReflex | PriorityTier::SafetyInterrupt)
    }

    /// Budget class implied by the tier.
    pub fn budget_class(&self) -> BudgetClass {
        match self {
            PriorityTier::SafetyReflex | PriorityTier::SafetyInterrupt => BudgetClass::Emergency,
            PriorityTier::GoalCompletion | PriorityTier::Idle => BudgetClass::Routine,
            PriorityTier::Exploration => BudgetClass::Deliberative,
        }
    }
}

/// Performance budget class selected per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetClass {
    Emergency,
    Routine,
    Deliberative,
}

/// Template parameters, ordered so that goal keys are stable.
pub type Bindings = BTreeMap<String, String>;

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalOrigin {
    Template,
    Subgoal,
    Injected,
}

/// A missing resource that blocks a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deficit {
    pub resource: String,
    pub needed: f64,
    pub available: f64,
}

impl Deficit {
    pub fn shortfall(&self) -> f64 {
        (self.needed - self.available).max(0.0)
    }
}

/// Outcome of a feasibility check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feasibility {
    pub ok: bool,
    pub deficits: Vec<Deficit>,
    pub alternative_templates: Vec<String>,
    /// Estimated cost of pursuing the goal; lower wins ties.
    pub cost: f64,
}

impl Feasibility {
    pub fn ok(cost: f64) -> Self {
        Self { ok: true, deficits: Vec::new(), alternative_templates: Vec::new(), cost }
    }

    pub fn blocked(deficits: Vec<Deficit>) -> Self {
        Self { ok: false, deficits, alternative_templates: Vec::new(), cost: f64::INFINITY }
    }

    pub fn with_alternatives(mut self, templates: Vec<String>) -> Self {
        self.alternative_templates = templates;
        self
    }
}

/// A concrete, parameterised objective owned by the current tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalCandidate {
    pub id: Uuid,
    pub template_ref: String,
    pub need: NeedKind,
    pub tier: PriorityTier,
    pub bindings: Bindings,
    pub priority: f64,
    pub feasibility: Option<Feasibility>,
    pub origin: GoalOrigin,
    pub parent: Option<Uuid>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl GoalCandidate {
    pub fn new(
        template_ref: impl Into<String>,
        need: NeedKind,
        tier: PriorityTier,
        bindings: Bindings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_ref: template_ref.into(),
            need,
            tier,
            bindings,
            priority: 0.0,
            feasibility: None,
            origin: GoalOrigin::Template,
            parent: None,
            tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Identity that is stable across ticks: template plus bindings.
    pub fn key(&self) -> String {
        goal_key(&self.template_ref, &self.bindings)
    }

    pub fn signature(&self) -> TaskSignature {
        TaskSignature {
            need: self.need,
            tier: self.tier,
            template: self.template_ref.clone(),
            class: self.tier.budget_class(),
        }
    }
}

/// Render `template{k=v,...}`.
pub fn goal_key(template: &str, bindings: &Bindings) -> String {
    if bindings.is_empty() {
        return template.to_string();
    }
    let params: Vec<String> = bindings.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{template}{{{}}}", params.join(","))
}

/// A goal proposal injected from outside the tick loop (operator, peer agent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalProposal {
    pub template_ref: String,
    #[serde(default)]
    pub bindings: Bindings,
    pub need: NeedKind,
    #[serde(default)]
    pub tier: Option<PriorityTier>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: String,
}

/// What the router matches routing rules against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskSignature {
    pub need: NeedKind,
    pub tier: PriorityTier,
    pub template: String,
    pub class: BudgetClass,
}

impl fmt::Display for TaskSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{:?}/{:?}", self.need, self.template, self.tier, self.class)
    }
}

/// One step of a plan. `capability` references the registered executor; no
/// code is carried inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Action {
    pub name: String,
    pub capability: String,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
    #[serde(default)]
    pub preconditions: Vec<Condition>,
    #[serde(default)]
    pub effects: Vec<Effect>,
    #[serde(default)]
    pub cost: f64,
}

impl Action {
    /// An action named after the capability it invokes.
    pub fn invoke(capability: impl Into<String>) -> Self {
        let capability = capability.into();
        Self {
            name: capability.clone(),
            capability,
            params: BTreeMap::new(),
            preconditions: Vec::new(),
            effects: Vec::new(),
            cost: 0.0,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: f64) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Output of a planner; consumed once by the preemption ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    pub goal_id: Uuid,
    pub steps: Vec<Action>,
    pub confidence: f64,
}
