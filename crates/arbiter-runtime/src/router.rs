//! [`CognitiveRouter`] – picks a planner for a goal and calls it under a deadline.
//!
//! Selection is a pure function of the task signature, the routing table,
//! the registered planners and the degradation level
//! ([`CognitiveRouter::select`]); the router never plans itself.
//!
//! Order of the route:
//!
//! 1. Routing rules matching the signature, by confidence (then rule
//!    specificity, then planner registration order).
//! 2. The template's declared fallback module.
//! 3. The degradation ladder: every remaining eligible planner from the most
//!    to the least capable tier (`deliberative → structured → reactive → reflex`).
//!
//! Planners whose tier the degradation level forbids, that cannot handle the
//! signature, or whose estimate exceeds the routing budget are skipped. In
//! `SAFE_MODE` the ranking is ignored and planners are tried fastest first.
//!
//! Each planner runs on its own task with a [`CancellationToken`]. When its
//! slice of the budget runs out the token is cancelled and the task aborted;
//! a planner still running after a short grace period is reported to the
//! [`Watchdog`] as `CancellationIgnored`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arbiter_kernel::Watchdog;
use arbiter_types::config::RoutingRule;
use arbiter_types::{ArbiterError, DegradationLevel, GoalCandidate, Plan, TaskSignature, WorldState};
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::goals::GoalTemplate;
use crate::planners::llm::LlmError;

/// Fault message reported when a planner outlives its cancellation grace.
pub const CANCELLATION_IGNORED: &str = "CancellationIgnored";

const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(2);
/// Share of the routing budget held back while a non-final planner runs.
const FALLBACK_RESERVE: f64 = 0.2;
/// A planner is allotted this multiple of its own estimate.
const ESTIMATE_SLACK: u32 = 2;
const MIN_SLICE: Duration = Duration::from_millis(5);

// ────────────────────────────────────────────────────────────────────────────
// Planner interface
// ────────────────────────────────────────────────────────────────────────────

/// Reasoning capability of a planner, least capable first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlannerTier {
    Reflex,
    Reactive,
    Structured,
    Deliberative,
}

impl PlannerTier {
    /// Whether the degradation level still permits this tier.
    pub fn allowed_at(self, level: DegradationLevel) -> bool {
        match level {
            DegradationLevel::Full | DegradationLevel::SafeMode => true,
            DegradationLevel::DegradedReasoning => self <= PlannerTier::Structured,
            DegradationLevel::DegradedPlanning => self <= PlannerTier::Reactive,
            DegradationLevel::Basic => self == PlannerTier::Reflex,
        }
    }
}

impl fmt::Display for PlannerTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlannerTier::Reflex => "reflex",
            PlannerTier::Reactive => "reactive",
            PlannerTier::Structured => "structured",
            PlannerTier::Deliberative => "deliberative",
        };
        f.write_str(s)
    }
}

/// Everything a planner gets to see.
#[derive(Debug, Clone)]
pub struct PlanningTask {
    pub candidate: GoalCandidate,
    pub template: Option<GoalTemplate>,
    pub world: WorldState,
    /// Absolute deadline of this invocation.
    pub deadline: Instant,
}

impl PlanningTask {
    pub fn new(candidate: GoalCandidate, template: Option<GoalTemplate>, world: WorldState) -> Self {
        Self { candidate, template, world, deadline: Instant::now() }
    }

    pub fn signature(&self) -> TaskSignature {
        self.candidate.signature()
    }
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("cannot handle {0}")]
    Unsupported(String),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// A reasoning back-end registered with the router.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Module name used by routing rules.
    fn name(&self) -> &str;

    fn tier(&self) -> PlannerTier;

    fn can_handle(&self, signature: &TaskSignature) -> bool;

    fn estimate_processing_time(&self, task: &PlanningTask) -> Duration;

    /// Produce a plan before `task.deadline`. Long-running planners should
    /// watch `cancel` and return [`PlannerError::Cancelled`] promptly.
    async fn process(&self, task: PlanningTask, cancel: CancellationToken) -> Result<Plan, PlannerError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Results
// ────────────────────────────────────────────────────────────────────────────

/// One entry of a route, as chosen by [`CognitiveRouter::select`].
#[derive(Debug, Clone, PartialEq)]
pub struct RouteChoice {
    pub module: String,
    /// Rule confidence; `0.0` for fallback entries.
    pub confidence: f64,
    pub estimate: Duration,
}

#[derive(Debug)]
pub struct RoutedPlan {
    pub plan: Plan,
    pub module: String,
    pub elapsed: Duration,
    /// Planners that failed or timed out before `module` answered.
    pub failures: Vec<ArbiterError>,
}

/// Every planner on the route failed.
#[derive(Debug, Error)]
#[error("routing failed for {goal} after {} attempt(s)", .failures.len())]
pub struct RouteFailure {
    pub goal: String,
    pub failures: Vec<ArbiterError>,
}

impl RouteFailure {
    pub fn timed_out(&self) -> bool {
        self.failures.iter().any(ArbiterError::is_timeout)
    }
}

impl From<RouteFailure> for ArbiterError {
    fn from(failure: RouteFailure) -> Self {
        let reason = if failure.failures.is_empty() {
            "no eligible planner within budget".to_string()
        } else {
            failure.failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
        };
        ArbiterError::RoutingFailed { goal: failure.goal, reason }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CognitiveRouter
// ────────────────────────────────────────────────────────────────────────────

pub struct CognitiveRouter {
    planners: Vec<Arc<dyn Planner>>,
    rules: Vec<RoutingRule>,
    watchdog: Arc<Watchdog>,
    cancel_grace: Duration,
}

impl CognitiveRouter {
    pub fn new(rules: Vec<RoutingRule>, watchdog: Arc<Watchdog>) -> Self {
        Self { planners: Vec::new(), rules, watchdog, cancel_grace: DEFAULT_CANCEL_GRACE }
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Register a planner. Registration order breaks confidence ties.
    pub fn register(&mut self, planner: Arc<dyn Planner>) -> Result<(), ArbiterError> {
        if self.planners.iter().any(|p| p.name() == planner.name()) {
            return Err(ArbiterError::Config(format!("planner '{}' registered twice", planner.name())));
        }
        info!(planner = planner.name(), tier = %planner.tier(), "planner registered");
        self.planners.push(planner);
        Ok(())
    }

    pub fn planner_names(&self) -> Vec<&str> {
        self.planners.iter().map(|p| p.name()).collect()
    }

    fn planner(&self, name: &str) -> Option<&Arc<dyn Planner>> {
        self.planners.iter().find(|p| p.name() == name)
    }

    fn registration_index(&self, name: &str) -> usize {
        self.planners.iter().position(|p| p.name() == name).unwrap_or(usize::MAX)
    }

    /// The ordered route for `task`. Pure: no planner is invoked.
    pub fn select(&self, task: &PlanningTask, budget: Duration, level: DegradationLevel) -> Vec<RouteChoice> {
        let signature = task.signature();
        let eligible: Vec<&Arc<dyn Planner>> = self
            .planners
            .iter()
            .filter(|p| p.tier().allowed_at(level) && p.can_handle(&signature))
            .filter(|p| p.estimate_processing_time(task) <= budget)
            .collect();
        let choice = |p: &Arc<dyn Planner>, confidence: f64| RouteChoice {
            module: p.name().to_string(),
            confidence,
            estimate: p.estimate_processing_time(task),
        };

        if level == DegradationLevel::SafeMode {
            let mut fastest: Vec<RouteChoice> = eligible.iter().map(|p| choice(*p, 0.0)).collect();
            fastest.sort_by(|a, b| {
                a.estimate
                    .cmp(&b.estimate)
                    .then_with(|| self.registration_index(&a.module).cmp(&self.registration_index(&b.module)))
            });
            return fastest;
        }

        // Best (confidence, specificity) per module.
        let mut ranked: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        for rule in self.rules.iter().filter(|r| r.signature.matches(&signature)) {
            let score = (rule.confidence, rule.signature.specificity());
            ranked
                .entry(rule.module.as_str())
                .and_modify(|best| {
                    if score.0 > best.0 || (score.0 == best.0 && score.1 > best.1) {
                        *best = score;
                    }
                })
                .or_insert(score);
        }
        let mut ranked: Vec<(&str, f64, usize)> = ranked.into_iter().map(|(m, (c, s))| (m, c, s)).collect();
        ranked.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then(b.2.cmp(&a.2))
                .then_with(|| self.registration_index(a.0).cmp(&self.registration_index(b.0)))
        });

        let mut route: Vec<RouteChoice> = Vec::new();
        let push = |p: &Arc<dyn Planner>, confidence: f64, route: &mut Vec<RouteChoice>| {
            if !route.iter().any(|c| c.module == p.name()) {
                route.push(choice(p, confidence));
            }
        };
        for (module, confidence, _) in ranked {
            if let Some(p) = eligible.iter().find(|p| p.name() == module) {
                push(*p, confidence, &mut route);
            }
        }
        if let Some(fallback) = task.template.as_ref().and_then(|t| t.fallback.as_deref())
            && let Some(p) = eligible.iter().find(|p| p.name() == fallback)
        {
            push(*p, 0.0, &mut route);
        }
        let mut ladder = eligible.clone();
        ladder.sort_by(|a, b| {
            b.tier()
                .cmp(&a.tier())
                .then_with(|| self.registration_index(a.name()).cmp(&self.registration_index(b.name())))
        });
        for p in ladder {
            push(p, 0.0, &mut route);
        }
        route
    }

    /// Route `task` within `budget`, falling back along the route on failure
    /// or timeout.
    #[instrument(skip_all, fields(goal = %task.candidate.key(), budget_ms = budget.as_millis() as u64, %level))]
    pub async fn route(
        &self,
        task: PlanningTask,
        budget: Duration,
        level: DegradationLevel,
    ) -> Result<RoutedPlan, RouteFailure> {
        let started = Instant::now();
        let deadline = started + budget;
        let goal = task.candidate.key();
        let route = self.select(&task, budget, level);
        debug!(route = ?route.iter().map(|c| c.module.as_str()).collect::<Vec<_>>(), "route selected");

        let mut failures = Vec::new();
        for (i, choice) in route.iter().enumerate() {
            let Some(planner) = self.planner(&choice.module) else { continue };
            let now = Instant::now();
            let remaining = deadline.saturating_duration_since(now);
            let reserve = if i + 1 == route.len() { Duration::ZERO } else { budget.mul_f64(FALLBACK_RESERVE) };
            let slice = remaining
                .saturating_sub(reserve)
                .min((choice.estimate * ESTIMATE_SLACK).max(MIN_SLICE));
            if slice.is_zero() || choice.estimate > slice {
                debug!(module = %choice.module, ?slice, "not enough budget left, skipping");
                continue;
            }

            let mut attempt = task.clone();
            attempt.deadline = now + slice;
            match self.invoke(planner, attempt, slice).await {
                Ok(plan) if plan.steps.is_empty() => {
                    failures.push(ArbiterError::RoutingFailed {
                        goal: goal.clone(),
                        reason: format!("{} returned an empty plan", choice.module),
                    });
                }
                Ok(mut plan) => {
                    plan.goal_id = task.candidate.id;
                    self.watchdog.heartbeat(&component(&choice.module));
                    let elapsed = started.elapsed();
                    info!(module = %choice.module, steps = plan.steps.len(), elapsed_ms = elapsed.as_secs_f64() * 1e3, "plan routed");
                    return Ok(RoutedPlan { plan, module: choice.module.clone(), elapsed, failures });
                }
                Err(err) => {
                    warn!(module = %choice.module, %err, "planner failed, falling back");
                    failures.push(err);
                }
            }
        }
        Err(RouteFailure { goal, failures })
    }

    async fn invoke(&self, planner: &Arc<dyn Planner>, task: PlanningTask, slice: Duration) -> Result<Plan, ArbiterError> {
        let module = planner.name().to_string();
        let goal = task.candidate.key();
        let cancel = CancellationToken::new();
        let worker = Arc::clone(planner);
        let token = cancel.clone();
        let mut handle = tokio::spawn(async move { worker.process(task, token).await });

        match tokio::time::timeout(slice, &mut handle).await {
            Ok(Ok(Ok(plan))) => Ok(plan),
            Ok(Ok(Err(err))) => Err(ArbiterError::RoutingFailed { goal, reason: format!("{module}: {err}") }),
            Ok(Err(join)) => Err(ArbiterError::RoutingFailed { goal, reason: format!("{module} task died: {join}") }),
            Err(_) => {
                cancel.cancel();
                handle.abort();
                if tokio::time::timeout(self.cancel_grace, &mut handle).await.is_err() {
                    self.watchdog.report_fault(&component(&module), CANCELLATION_IGNORED);
                }
                Err(ArbiterError::RoutingTimeout { module, budget_ms: slice.as_millis() as u64 })
            }
        }
    }
}

/// Watchdog component id of a planner.
pub fn component(module: &str) -> String {
    format!("planner:{module}")
}
