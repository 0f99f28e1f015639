//! [`PolicyEngine`] – constitutional rule evaluation.
//!
//! Every applicable [`PolicyRule`] yields a [`Verdict`]; the engine folds
//! them into one [`PolicyDecision`]:
//!
//! | Verdict | Strict | Standard |
//! |---|---|---|
//! | `ALLOW` | proceeds | proceeds |
//! | `MODIFY` with correction | proceeds, corrected | proceeds, corrected |
//! | `MODIFY` without correction | blocked | proceeds with warning |
//! | `FLAG` | blocked | proceeds with warning |
//! | `DENY` / `ESCALATE` | blocked | blocked |
//!
//! Blocking verdicts short-circuit and come back as a [`Rejection`] carrying
//! the rule id and the trace of every rule evaluated so far. They are never
//! retried.
//!
//! While safe mode is active, actions whose capability is not on the
//! allow-list are denied under the [`SAFE_MODE_RULE_ID`] rule before any
//! configured rule runs.

use std::collections::BTreeMap;

use arbiter_types::config::{ConstitutionalRule, ParamLimit, PolicyConfig, RuleMatcher, RuleSubject};
use arbiter_types::{
    CapabilitySpec, EnforcementMode, ExecutionRequest, GateStage, Rejection, RiskLevel,
    RuleEvaluation, Verdict,
};
use tracing::{debug, warn};

/// Rule id reported when safe mode blocks a capability.
pub const SAFE_MODE_RULE_ID: &str = "safe-mode-allow-list";

// ────────────────────────────────────────────────────────────────────────────
// Subject
// ────────────────────────────────────────────────────────────────────────────

/// What a rule is evaluated against.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySubject {
    pub kind: RuleSubject,
    /// Capability id for actions, template name for goals.
    pub name: String,
    pub tags: Vec<String>,
    pub risk: Option<RiskLevel>,
    pub params: BTreeMap<String, f64>,
}

impl PolicySubject {
    pub fn goal(template: impl Into<String>, tags: &[String]) -> Self {
        Self {
            kind: RuleSubject::Goal,
            name: template.into(),
            tags: tags.to_vec(),
            risk: None,
            params: BTreeMap::new(),
        }
    }

    /// Request tags are merged with the capability's declared safety tags.
    pub fn action(request: &ExecutionRequest, spec: &CapabilitySpec) -> Self {
        let mut tags = request.tags.clone();
        for tag in &spec.safety_tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        Self {
            kind: RuleSubject::Action,
            name: request.capability.clone(),
            tags,
            risk: Some(spec.risk_level),
            params: request.params.clone(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single policy rule.
pub trait PolicyRule: Send + Sync {
    fn id(&self) -> &str;

    /// `None` when the rule does not apply to `subject`.
    fn evaluate(&self, subject: &PolicySubject) -> Option<RuleEvaluation>;

    /// Clamp applied when the rule answers `MODIFY`.
    fn correction(&self) -> Option<&ParamLimit> {
        None
    }
}

fn name_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

fn matcher_fires(matcher: &RuleMatcher, subject: &PolicySubject) -> bool {
    if !matcher.names.is_empty() && !matcher.names.iter().any(|p| name_matches(p, &subject.name)) {
        return false;
    }
    if !matcher.tags.is_empty() && !matcher.tags.iter().any(|t| subject.tags.contains(t)) {
        return false;
    }
    if let Some(min) = matcher.min_risk
        && subject.risk.is_none_or(|r| r < min)
    {
        return false;
    }
    if let Some(limit) = &matcher.param_above
        && subject.params.get(&limit.param).is_none_or(|v| *v <= limit.max)
    {
        return false;
    }
    true
}

impl PolicyRule for ConstitutionalRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn evaluate(&self, subject: &PolicySubject) -> Option<RuleEvaluation> {
        let applies = self.applies_to == RuleSubject::Any || self.applies_to == subject.kind;
        if !applies || !matcher_fires(&self.matcher, subject) {
            return None;
        }
        Some(RuleEvaluation {
            rule_id: self.id.clone(),
            verdict: self.verdict,
            reason: self.description.clone(),
        })
    }

    fn correction(&self) -> Option<&ParamLimit> {
        self.correction.as_ref()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Decision
// ────────────────────────────────────────────────────────────────────────────

/// Outcome of a non-blocking evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDecision {
    /// Most severe verdict among the rules that fired (`Allow` if none did).
    pub verdict: Option<Verdict>,
    pub trace: Vec<RuleEvaluation>,
    pub corrections: Vec<ParamLimit>,
    pub warnings: Vec<String>,
}

impl PolicyDecision {
    pub fn effective_verdict(&self) -> Verdict {
        self.verdict.unwrap_or(Verdict::Allow)
    }

    /// Clamp `params` to every collected correction.
    pub fn apply_corrections(&self, params: &mut BTreeMap<String, f64>) {
        for limit in &self.corrections {
            if let Some(v) = params.get_mut(&limit.param)
                && *v > limit.max
            {
                debug!(param = %limit.param, from = *v, to = limit.max, "policy correction applied");
                *v = limit.max;
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PolicyEngine
// ────────────────────────────────────────────────────────────────────────────

/// Rule engine evaluating goals and actions against the constitution.
///
/// # Example
///
/// ```
/// use arbiter_kernel::policy::{PolicyEngine, PolicySubject};
/// use arbiter_types::config::PolicyConfig;
///
/// let engine = PolicyEngine::from_config(&PolicyConfig::default());
/// let rejection = engine
///     .evaluate(&PolicySubject::goal("destroy_house", &[]), false)
///     .unwrap_err();
/// assert_eq!(rejection.rule_id.as_deref(), Some("no-griefing"));
/// ```
pub struct PolicyEngine {
    rules: Vec<Box<dyn PolicyRule>>,
    enforcement: EnforcementMode,
    safe_mode_allow_list: Vec<String>,
}

impl PolicyEngine {
    pub fn new(enforcement: EnforcementMode, safe_mode_allow_list: Vec<String>) -> Self {
        Self { rules: Vec::new(), enforcement, safe_mode_allow_list }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        let mut engine = Self::new(config.enforcement, config.safe_mode_allow_list.clone());
        for rule in &config.rules {
            engine.add_rule(Box::new(rule.clone()));
        }
        engine
    }

    /// Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn PolicyRule>) {
        self.rules.push(rule);
    }

    pub fn enforcement(&self) -> EnforcementMode {
        self.enforcement
    }

    pub fn safe_mode_allows(&self, capability: &str) -> bool {
        self.safe_mode_allow_list.iter().any(|c| c == capability)
    }

    /// Evaluate every applicable rule against `subject`.
    pub fn evaluate(&self, subject: &PolicySubject, safe_mode: bool) -> Result<PolicyDecision, Rejection> {
        let mut decision = PolicyDecision::default();

        if safe_mode && subject.kind == RuleSubject::Action && !self.safe_mode_allows(&subject.name) {
            let eval = RuleEvaluation {
                rule_id: SAFE_MODE_RULE_ID.to_string(),
                verdict: Verdict::Deny,
                reason: "safe mode permits allow-listed capabilities only".to_string(),
            };
            return Err(self.reject(subject, eval, decision.trace));
        }

        for rule in &self.rules {
            let Some(eval) = rule.evaluate(subject) else {
                continue;
            };
            if eval.verdict.always_blocks() {
                return Err(self.reject(subject, eval, decision.trace));
            }
            match eval.verdict {
                Verdict::Allow => {}
                Verdict::Modify => match rule.correction() {
                    Some(limit) => decision.corrections.push(limit.clone()),
                    None if self.enforcement == EnforcementMode::Strict => {
                        return Err(self.reject(subject, eval, decision.trace));
                    }
                    None => decision
                        .warnings
                        .push(format!("{}: modification required but no correction defined", eval.rule_id)),
                },
                Verdict::Flag => {
                    if self.enforcement == EnforcementMode::Strict {
                        return Err(self.reject(subject, eval, decision.trace));
                    }
                    decision.warnings.push(format!("{}: {}", eval.rule_id, eval.reason));
                }
                Verdict::Deny | Verdict::Escalate => {}
            }
            if decision.verdict.is_none_or(|v| eval.verdict.severity() > v.severity()) {
                decision.verdict = Some(eval.verdict);
            }
            decision.trace.push(eval);
        }

        Ok(decision)
    }

    fn reject(&self, subject: &PolicySubject, eval: RuleEvaluation, mut trace: Vec<RuleEvaluation>) -> Rejection {
        warn!(
            subject = %subject.name,
            rule = %eval.rule_id,
            verdict = ?eval.verdict,
            "policy blocked subject"
        );
        let reason = format!("{:?}: {}", eval.verdict, eval.reason);
        let rule_id = eval.rule_id.clone();
        trace.push(eval);
        Rejection::new(subject.name.clone(), GateStage::Policy, reason)
            .with_rule(rule_id)
            .with_trace(trace)
    }
}
