//! Goal templates, the enumerator and the feasibility checker.
//!
//! Every need exposes a set of [`GoalTemplate`]s. A template is a plain
//! record: its precondition predicate, feasibility requirements and plan
//! hint are data, evaluated by small pure functions on the record itself.
//!
//! Feasibility failures are not dead ends: each missing resource becomes a
//! `gather` subgoal (at most `max_subgoal_depth` levels deep per tick), so
//! inventory gaps turn into actionable candidates.
//!
//! # Example
//!
//! ```
//! use arbiter_runtime::goals::{FeasibilityChecker, GoalLibrary};
//! use arbiter_types::{Bindings, GoalCandidate, GoalOrigin, NeedKind, PriorityTier, WorldState};
//!
//! let library = GoalLibrary::default();
//! let checker = FeasibilityChecker::new(1);
//! let build = GoalCandidate::new("build_shelter", NeedKind::Progress, PriorityTier::GoalCompletion, Bindings::new());
//!
//! // No wood: the shelter is blocked and a gather subgoal takes its place.
//! let outcome = checker.check(&library, vec![build], &WorldState::new());
//! assert!(outcome.infeasible.len() == 1);
//! assert_eq!(outcome.feasible[0].origin, GoalOrigin::Subgoal);
//! assert_eq!(outcome.feasible[0].key(), "gather{amount=4,resource=wood}");
//! ```

use std::collections::{BTreeMap, HashSet};

use arbiter_perception::{NeedTable, SignalSnapshot};
use arbiter_types::{
    Action, ArbiterError, Bindings, Condition, Deficit, Feasibility, GoalCandidate, GoalOrigin,
    GoalProposal, NeedKind, PriorityTier, WorldState,
};
use tracing::{debug, warn};

/// Template that fills resource deficits.
pub const GATHER_TEMPLATE: &str = "gather";

// ────────────────────────────────────────────────────────────────────────────
// Template records
// ────────────────────────────────────────────────────────────────────────────

/// How a template picks its preemption tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TierRule {
    Fixed(PriorityTier),
    /// `SafetyReflex` once the need score reaches `reflex_at`, otherwise
    /// `otherwise`.
    Escalating { reflex_at: f64, otherwise: PriorityTier },
}

impl TierRule {
    pub fn resolve(&self, need_score: f64) -> PriorityTier {
        match *self {
            TierRule::Fixed(tier) => tier,
            TierRule::Escalating { reflex_at, otherwise } => {
                if need_score >= reflex_at { PriorityTier::SafetyReflex } else { otherwise }
            }
        }
    }
}

/// A resource the world must hold before the goal can be pursued.
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    pub resource: String,
    pub amount: f64,
}

/// Per-template context multiplier, applied by the ranker as the goal's
/// context gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextMultiplier {
    pub signal: String,
    pub threshold: f64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoalTemplate {
    pub name: String,
    pub need: NeedKind,
    pub tier: TierRule,
    /// World facts that must hold for the template to be enumerated at all.
    pub preconditions: Vec<Condition>,
    /// Resources that must be on hand; shortfalls become deficits.
    pub requirements: Vec<Requirement>,
    /// Steps a structured planner expands. `{key}` in a capability name is
    /// replaced by the binding `key`.
    pub plan_hint: Vec<Action>,
    /// When set, the plan hint is repeated `bindings[repeat_by]` times.
    pub repeat_by: Option<String>,
    pub risk: f64,
    pub novelty: f64,
    pub cost: f64,
    pub context: Vec<ContextMultiplier>,
    /// Planner module tried before the generic degradation ladder.
    pub fallback: Option<String>,
    pub alternatives: Vec<String>,
    /// Resources this template can produce (only meaningful for `gather`).
    pub produces: Vec<String>,
    /// Reachable only as a feasibility subgoal or by injection.
    pub subgoal_only: bool,
    pub tags: Vec<String>,
}

impl GoalTemplate {
    pub fn new(name: impl Into<String>, need: NeedKind, tier: TierRule) -> Self {
        Self {
            name: name.into(),
            need,
            tier,
            preconditions: Vec::new(),
            requirements: Vec::new(),
            plan_hint: Vec::new(),
            repeat_by: None,
            risk: 0.0,
            novelty: 0.0,
            cost: 1.0,
            context: Vec::new(),
            fallback: None,
            alternatives: Vec::new(),
            produces: Vec::new(),
            subgoal_only: false,
            tags: Vec::new(),
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.preconditions.push(condition);
        self
    }

    pub fn requires(mut self, resource: impl Into<String>, amount: f64) -> Self {
        self.requirements.push(Requirement { resource: resource.into(), amount });
        self
    }

    pub fn step(mut self, action: Action) -> Self {
        self.plan_hint.push(action);
        self
    }

    pub fn risk(mut self, risk: f64) -> Self {
        self.risk = risk;
        self
    }

    pub fn novelty(mut self, novelty: f64) -> Self {
        self.novelty = novelty;
        self
    }

    pub fn cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn gated_by(mut self, signal: impl Into<String>, threshold: f64, multiplier: f64) -> Self {
        self.context.push(ContextMultiplier { signal: signal.into(), threshold, multiplier });
        self
    }

    pub fn fallback(mut self, module: impl Into<String>) -> Self {
        self.fallback = Some(module.into());
        self
    }

    pub fn alternative(mut self, template: impl Into<String>) -> Self {
        self.alternatives.push(template.into());
        self
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Precondition predicate.
    pub fn applicable(&self, world: &WorldState) -> bool {
        world.first_unmet(&self.preconditions).is_none()
    }

    /// Feasibility function: `ok` with the template cost, or the deficits
    /// that block it.
    pub fn feasibility(&self, world: &WorldState) -> Feasibility {
        let deficits: Vec<Deficit> = self
            .requirements
            .iter()
            .filter(|r| world.value(&r.resource) < r.amount)
            .map(|r| Deficit {
                resource: r.resource.clone(),
                needed: r.amount,
                available: world.value(&r.resource),
            })
            .collect();
        if deficits.is_empty() {
            Feasibility::ok(self.cost)
        } else {
            Feasibility::blocked(deficits)
        }
    }

    /// Product of every context multiplier whose signal is at or above its
    /// threshold.
    pub fn context_gate(&self, snapshot: &SignalSnapshot) -> f64 {
        self.context
            .iter()
            .filter(|m| snapshot.value(&m.signal) >= m.threshold)
            .map(|m| m.multiplier)
            .product()
    }

    /// Plan-hint generator: substitutes bindings into capability names and
    /// applies `repeat_by`.
    pub fn expand_hint(&self, bindings: &Bindings) -> Vec<Action> {
        let repeats = self
            .repeat_by
            .as_ref()
            .and_then(|key| bindings.get(key))
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        let once: Vec<Action> = self.plan_hint.iter().map(|a| bind_action(a, bindings)).collect();
        std::iter::repeat_n(once, repeats).flatten().collect()
    }
}

/// Replace `{key}` placeholders in an action's name and capability.
pub fn bind_action(action: &Action, bindings: &Bindings) -> Action {
    let mut action = action.clone();
    for (key, value) in bindings {
        let placeholder = format!("{{{key}}}");
        action.capability = action.capability.replace(&placeholder, value);
        action.name = action.name.replace(&placeholder, value);
    }
    action
}

// ────────────────────────────────────────────────────────────────────────────
// Library
// ────────────────────────────────────────────────────────────────────────────

/// Registered templates, in registration order.
#[derive(Debug, Clone)]
pub struct GoalLibrary {
    templates: Vec<GoalTemplate>,
    index: BTreeMap<String, usize>,
}

impl GoalLibrary {
    pub fn new(templates: Vec<GoalTemplate>) -> Result<Self, ArbiterError> {
        let mut index = BTreeMap::new();
        for (i, template) in templates.iter().enumerate() {
            if index.insert(template.name.clone(), i).is_some() {
                return Err(ArbiterError::Config(format!(
                    "goal template '{}' registered twice",
                    template.name
                )));
            }
        }
        Ok(Self { templates, index })
    }

    pub fn get(&self, name: &str) -> Option<&GoalTemplate> {
        self.index.get(name).map(|&i| &self.templates[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &GoalTemplate> {
        self.templates.iter()
    }

    /// Templates the need exposes to the enumerator.
    pub fn for_need(&self, need: NeedKind) -> impl Iterator<Item = &GoalTemplate> {
        self.templates.iter().filter(move |t| t.need == need && !t.subgoal_only)
    }

    /// `gather` subgoal for a deficit, if some template can produce it.
    pub fn subgoal_for(&self, parent: &GoalCandidate, deficit: &Deficit) -> Option<GoalCandidate> {
        let gather = self.get(GATHER_TEMPLATE)?;
        if !gather.produces.iter().any(|r| r == &deficit.resource) {
            return None;
        }
        let mut bindings = Bindings::new();
        bindings.insert("resource".to_string(), deficit.resource.clone());
        bindings.insert("amount".to_string(), (deficit.shortfall().ceil() as u64).to_string());
        let mut sub = GoalCandidate::new(GATHER_TEMPLATE, parent.need, parent.tier, bindings);
        sub.origin = GoalOrigin::Subgoal;
        sub.parent = Some(parent.id);
        Some(sub)
    }
}

impl Default for GoalLibrary {
    /// Templates of the bundled demo world.
    fn default() -> Self {
        let safety = TierRule::Escalating { reflex_at: 0.6, otherwise: PriorityTier::SafetyInterrupt };
        let completion = TierRule::Fixed(PriorityTier::GoalCompletion);
        let exploration = TierRule::Fixed(PriorityTier::Exploration);

        let mut gather = GoalTemplate::new(GATHER_TEMPLATE, NeedKind::Progress, completion)
            .step(Action::invoke("gather_{resource}"))
            .cost(1.0);
        gather.repeat_by = Some("amount".to_string());
        gather.produces = vec!["food".to_string(), "wood".to_string()];
        gather.subgoal_only = true;

        let templates = vec![
            GoalTemplate::new("flee", NeedKind::Safety, safety)
                .step(Action::invoke("flee").with_param("speed", 1.0))
                .cost(0.5)
                .fallback("reflex")
                .alternative("hide"),
            GoalTemplate::new("hide", NeedKind::Safety, TierRule::Fixed(PriorityTier::SafetyInterrupt))
                .when(Condition::absent("hidden"))
                .step(Action::invoke("hide"))
                .gated_by("night", 0.5, 1.2)
                .fallback("reflex"),
            GoalTemplate::new("eat", NeedKind::Nutrition, completion)
                .requires("food", 1.0)
                .step(Action::invoke("eat"))
                .cost(0.5),
            gather,
            GoalTemplate::new("build_shelter", NeedKind::Progress, completion)
                .requires("wood", 4.0)
                .step(Action::invoke("build"))
                .risk(0.1)
                .cost(3.0),
            GoalTemplate::new("craft_tool", NeedKind::Integrity, completion)
                .requires("wood", 2.0)
                .step(Action::invoke("craft_tool"))
                .risk(0.1)
                .cost(2.0),
            GoalTemplate::new("repair", NeedKind::Integrity, completion)
                .requires("wood", 1.0)
                .step(Action::invoke("repair"))
                .cost(1.5),
            GoalTemplate::new("socialize", NeedKind::Social, exploration)
                .step(Action::invoke("socialize"))
                .novelty(0.05)
                .cost(1.0),
            GoalTemplate::new("explore", NeedKind::Curiosity, exploration)
                .step(Action::invoke("explore"))
                .risk(0.2)
                .novelty(0.1)
                .cost(2.0)
                .gated_by("darkness", 0.7, 0.5),
            GoalTemplate::new("idle", NeedKind::Progress, TierRule::Fixed(PriorityTier::Idle))
                .step(Action::invoke("wait"))
                .cost(0.0),
        ];
        // Names above are unique.
        let index = templates.iter().enumerate().map(|(i, t)| (t.name.clone(), i)).collect();
        Self { templates, index }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Enumerator
// ────────────────────────────────────────────────────────────────────────────

pub struct GoalEnumerator {
    activation_threshold: f64,
}

impl GoalEnumerator {
    pub fn new(activation_threshold: f64) -> Self {
        Self { activation_threshold }
    }

    /// Candidates for every active need, in need-score order then template
    /// registration order. When nothing is active the `idle` template is
    /// offered so the ladder always has something to run.
    pub fn enumerate(&self, library: &GoalLibrary, needs: &NeedTable, world: &WorldState) -> Vec<GoalCandidate> {
        let mut out = Vec::new();
        for need in needs.active(self.activation_threshold) {
            for template in library.for_need(need.need) {
                if template.tier == TierRule::Fixed(PriorityTier::Idle) || !template.applicable(world) {
                    continue;
                }
                let mut candidate = GoalCandidate::new(
                    template.name.clone(),
                    need.need,
                    template.tier.resolve(need.score),
                    Bindings::new(),
                );
                candidate.tags = template.tags.clone();
                out.push(candidate);
            }
        }
        if out.is_empty()
            && let Some(idle) = library.get("idle")
        {
            out.push(GoalCandidate::new(idle.name.clone(), idle.need, PriorityTier::Idle, Bindings::new()));
        }
        debug!(count = out.len(), "goal candidates enumerated");
        out
    }

    /// Turn an externally injected proposal into a candidate. Unknown
    /// templates and templates whose preconditions do not hold in `world`
    /// are rejected here. A proposed tier may lower the goal's priority but
    /// never raise it above what the template itself resolves to.
    pub fn inject(
        &self,
        library: &GoalLibrary,
        needs: &NeedTable,
        world: &WorldState,
        proposal: &GoalProposal,
    ) -> Result<GoalCandidate, ArbiterError> {
        let infeasible = || ArbiterError::InfeasibleGoal { goal: proposal.template_ref.clone(), deficits: Vec::new() };
        let template = library.get(&proposal.template_ref).ok_or_else(infeasible)?;
        if let Some(unmet) = world.first_unmet(&template.preconditions) {
            debug!(template = %template.name, fact = %unmet.fact, "injected goal not applicable");
            return Err(infeasible());
        }
        let resolved = template.tier.resolve(needs.score(proposal.need));
        let tier = match proposal.tier {
            Some(requested) if requested.rank() >= resolved.rank() => requested,
            Some(requested) => {
                debug!(template = %template.name, ?requested, ?resolved, "injected tier clamped");
                resolved
            }
            None => resolved,
        };
        let mut candidate =
            GoalCandidate::new(template.name.clone(), proposal.need, tier, proposal.bindings.clone());
        candidate.origin = GoalOrigin::Injected;
        candidate.tags = template.tags.iter().chain(&proposal.tags).cloned().collect();
        Ok(candidate)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Feasibility
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FeasibilityOutcome {
    /// Feasible candidates (including generated subgoals), deduplicated by
    /// goal key, in input order.
    pub feasible: Vec<GoalCandidate>,
    /// Blocked candidates with the recovered error that explains them.
    pub infeasible: Vec<(GoalCandidate, ArbiterError)>,
}

pub struct FeasibilityChecker {
    max_depth: u8,
}

impl FeasibilityChecker {
    pub fn new(max_depth: u8) -> Self {
        Self { max_depth }
    }

    pub fn check(&self, library: &GoalLibrary, candidates: Vec<GoalCandidate>, world: &WorldState) -> FeasibilityOutcome {
        let mut outcome = FeasibilityOutcome::default();
        let mut seen = HashSet::new();
        let mut pending: Vec<(GoalCandidate, u8)> = candidates.into_iter().map(|c| (c, 0)).collect();
        pending.reverse();

        while let Some((mut candidate, depth)) = pending.pop() {
            if !seen.insert(candidate.key()) {
                continue;
            }
            let Some(template) = library.get(&candidate.template_ref) else {
                warn!(goal = %candidate.key(), "candidate references an unknown template");
                let err = ArbiterError::InfeasibleGoal { goal: candidate.key(), deficits: Vec::new() };
                outcome.infeasible.push((candidate, err));
                continue;
            };

            let feasibility = template.feasibility(world);
            if feasibility.ok {
                candidate.feasibility = Some(feasibility);
                outcome.feasible.push(candidate);
                continue;
            }

            let alternatives: Vec<String> = template
                .alternatives
                .iter()
                .filter(|name| library.get(name).is_some_and(|alt| alt.feasibility(world).ok))
                .cloned()
                .collect();
            let feasibility = feasibility.with_alternatives(alternatives);
            let err = ArbiterError::InfeasibleGoal {
                goal: candidate.key(),
                deficits: feasibility.deficits.clone(),
            };
            debug!(goal = %candidate.key(), %err, "recovering infeasible goal");

            if depth < self.max_depth {
                // Subgoals go to the front so they rank right after their parent's peers.
                let subs: Vec<GoalCandidate> = feasibility
                    .deficits
                    .iter()
                    .filter_map(|d| library.subgoal_for(&candidate, d))
                    .collect();
                for sub in subs.into_iter().rev() {
                    pending.push((sub, depth + 1));
                }
            }
            candidate.feasibility = Some(feasibility);
            outcome.infeasible.push((candidate, err));
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_types::NeedScore;

    fn needs(scores: &[(NeedKind, f64)]) -> NeedTable {
        NeedTable::from_scores(scores.iter().map(|&(need, score)| NeedScore { need, score, d_score: 0.0 }))
    }

    #[test]
    fn safety_tier_escalates_with_need_score() {
        let rule = TierRule::Escalating { reflex_at: 0.6, otherwise: PriorityTier::SafetyInterrupt };
        assert_eq!(rule.resolve(0.9), PriorityTier::SafetyReflex);
        assert_eq!(rule.resolve(0.3), PriorityTier::SafetyInterrupt);
    }

    #[test]
    fn inactive_needs_enumerate_nothing_but_idle() {
        let library = GoalLibrary::default();
        let enumerator = GoalEnumerator::new(0.15);
        let out = enumerator.enumerate(&library, &NeedTable::default(), &WorldState::new());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].template_ref, "idle");
        assert_eq!(out[0].tier, PriorityTier::Idle);
    }

    #[test]
    fn enumeration_follows_need_order_and_preconditions() {
        let library = GoalLibrary::default();
        let enumerator = GoalEnumerator::new(0.15);
        let table = needs(&[(NeedKind::Safety, 0.9), (NeedKind::Nutrition, 0.5)]);

        let out = enumerator.enumerate(&library, &table, &WorldState::new());
        let names: Vec<&str> = out.iter().map(|c| c.template_ref.as_str()).collect();
        assert_eq!(names, vec!["flee", "hide", "eat"]);
        assert_eq!(out[0].tier, PriorityTier::SafetyReflex);

        // Already hidden: the hide template's precondition fails.
        let hidden = WorldState::new().with("hidden", 1.0);
        let out = enumerator.enumerate(&library, &table, &hidden);
        assert!(out.iter().all(|c| c.template_ref != "hide"));
    }

    #[test]
    fn missing_resources_become_gather_subgoals() {
        let library = GoalLibrary::default();
        let checker = FeasibilityChecker::new(1);
        let eat = GoalCandidate::new("eat", NeedKind::Nutrition, PriorityTier::GoalCompletion, Bindings::new());
        let parent_id = eat.id;

        let outcome = checker.check(&library, vec![eat], &WorldState::new());
        assert_eq!(outcome.infeasible.len(), 1);
        assert!(matches!(outcome.infeasible[0].1, ArbiterError::InfeasibleGoal { .. }));
        assert_eq!(outcome.feasible.len(), 1);
        let sub = &outcome.feasible[0];
        assert_eq!(sub.key(), "gather{amount=1,resource=food}");
        assert_eq!(sub.parent, Some(parent_id));
        assert_eq!(sub.need, NeedKind::Nutrition);
    }

    #[test]
    fn subgoals_are_deduplicated_across_parents() {
        let library = GoalLibrary::default();
        let checker = FeasibilityChecker::new(1);
        let world = WorldState::new().with("wood", 2.0);
        let build = GoalCandidate::new("build_shelter", NeedKind::Progress, PriorityTier::GoalCompletion, Bindings::new());
        let also_build = GoalCandidate::new("build_shelter", NeedKind::Progress, PriorityTier::GoalCompletion, Bindings::new());
        let craft = GoalCandidate::new("craft_tool", NeedKind::Integrity, PriorityTier::GoalCompletion, Bindings::new());

        let outcome = checker.check(&library, vec![build, also_build, craft], &world);
        let keys: Vec<String> = outcome.feasible.iter().map(|c| c.key()).collect();
        assert_eq!(keys, vec!["gather{amount=2,resource=wood}", "craft_tool"]);
    }

    #[test]
    fn depth_limit_stops_subgoal_expansion() {
        let library = GoalLibrary::default();
        let checker = FeasibilityChecker::new(0);
        let eat = GoalCandidate::new("eat", NeedKind::Nutrition, PriorityTier::GoalCompletion, Bindings::new());
        let outcome = checker.check(&library, vec![eat], &WorldState::new());
        assert!(outcome.feasible.is_empty());
        assert_eq!(outcome.infeasible.len(), 1);
    }

    #[test]
    fn feasible_alternatives_are_reported() {
        let library = GoalLibrary::new(vec![
            GoalTemplate::new("build", NeedKind::Progress, TierRule::Fixed(PriorityTier::GoalCompletion))
                .requires("stone", 3.0)
                .alternative("build_wood")
                .alternative("build_clay"),
            GoalTemplate::new("build_wood", NeedKind::Progress, TierRule::Fixed(PriorityTier::GoalCompletion))
                .requires("wood", 1.0),
            GoalTemplate::new("build_clay", NeedKind::Progress, TierRule::Fixed(PriorityTier::GoalCompletion))
                .requires("clay", 1.0),
        ])
        .unwrap();
        let checker = FeasibilityChecker::new(1);
        let world = WorldState::new().with("wood", 1.0);
        let build = GoalCandidate::new("build", NeedKind::Progress, PriorityTier::GoalCompletion, Bindings::new());

        let outcome = checker.check(&library, vec![build], &world);
        let feasibility = outcome.infeasible[0].0.feasibility.clone().unwrap();
        assert_eq!(feasibility.alternative_templates, vec!["build_wood".to_string()]);
        // No gather template registered: nothing replaces the blocked goal.
        assert!(outcome.feasible.is_empty());
    }

    #[test]
    fn plan_hint_substitutes_bindings_and_repeats() {
        let library = GoalLibrary::default();
        let gather = library.get(GATHER_TEMPLATE).unwrap();
        let mut bindings = Bindings::new();
        bindings.insert("resource".into(), "wood".into());
        bindings.insert("amount".into(), "3".into());
        let steps = gather.expand_hint(&bindings);
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().all(|s| s.capability == "gather_wood"));
    }

    #[test]
    fn duplicate_template_names_are_rejected() {
        let t = GoalTemplate::new("flee", NeedKind::Safety, TierRule::Fixed(PriorityTier::SafetyReflex));
        assert!(GoalLibrary::new(vec![t.clone(), t]).is_err());
    }

    fn proposal(template: &str, need: NeedKind, tier: Option<PriorityTier>) -> GoalProposal {
        GoalProposal {
            template_ref: template.into(),
            bindings: Bindings::new(),
            need,
            tier,
            tags: vec!["operator".into()],
            source: "console".into(),
        }
    }

    #[test]
    fn injected_proposal_keeps_its_tags_and_a_lower_tier() {
        let library = GoalLibrary::default();
        let enumerator = GoalEnumerator::new(0.15);
        let world = WorldState::new();
        let proposal = proposal("explore", NeedKind::Curiosity, Some(PriorityTier::Idle));
        let candidate = enumerator.inject(&library, &NeedTable::default(), &world, &proposal).unwrap();
        assert_eq!(candidate.origin, GoalOrigin::Injected);
        assert_eq!(candidate.tier, PriorityTier::Idle);
        assert_eq!(candidate.tags, vec!["operator".to_string()]);

        let unknown = GoalProposal { template_ref: "teleport".into(), ..proposal };
        assert!(enumerator.inject(&library, &NeedTable::default(), &world, &unknown).is_err());
    }

    #[test]
    fn injected_tier_cannot_outrank_the_template() {
        let library = GoalLibrary::default();
        let enumerator = GoalEnumerator::new(0.15);
        let world = WorldState::new();

        let explore = proposal("explore", NeedKind::Curiosity, Some(PriorityTier::SafetyReflex));
        let candidate = enumerator.inject(&library, &NeedTable::default(), &world, &explore).unwrap();
        assert_eq!(candidate.tier, PriorityTier::Exploration);

        let idle = proposal("idle", NeedKind::Progress, Some(PriorityTier::GoalCompletion));
        let candidate = enumerator.inject(&library, &NeedTable::default(), &world, &idle).unwrap();
        assert_eq!(candidate.tier, PriorityTier::Idle);
    }

    #[test]
    fn injected_goal_with_unmet_preconditions_is_infeasible() {
        let library = GoalLibrary::default();
        let enumerator = GoalEnumerator::new(0.15);
        let hidden = WorldState::new().with("hidden", 1.0);

        let hide = proposal("hide", NeedKind::Safety, None);
        let err = enumerator.inject(&library, &NeedTable::default(), &hidden, &hide).unwrap_err();
        assert!(matches!(err, ArbiterError::InfeasibleGoal { ref goal, .. } if goal == "hide"));
        assert!(enumerator.inject(&library, &NeedTable::default(), &WorldState::new(), &hide).is_ok());
    }
}
