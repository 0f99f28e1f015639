//! [`ArbiterLoop`] – the per-tick driver.
//!
//! Each call to [`ArbiterLoop::tick`] runs one strict sequence of phases.
//! Every phase reads the previous phase's output and nothing else:
//!
//! 1. **Ingest** – drain the bounded signal channel and the goal inbox,
//!    normalise the batch and aggregate needs.
//! 2. **Arbitrate** – screen injected proposals against policy, enumerate
//!    template goals, check feasibility (emitting subgoals) and rank.
//! 3. **Route** – walk the ranking and hand the best goal the ladder can run
//!    now to the [`CognitiveRouter`] under its class budget.
//! 4. **Preempt** – submit the plan to the [`PreemptionLadder`].
//! 5. **Dispatch** – run the running task's next step through the
//!    [`CapabilityGate`].
//! 6. **Health** – fold timeouts, faults and frozen components into the
//!    [`DegradationController`], then publish [`TickTelemetry`].
//!
//! A phase that overruns its budget aborts the rest of the tick with
//! [`ArbiterError::WatchdogTimeout`]; the health phase still runs. Signals
//! and proposals that arrive mid-tick wait for the next drain.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo(executor: std::sync::Arc<dyn arbiter_kernel::CapabilityExecutor>) -> Result<(), arbiter_types::ArbiterError> {
//! use arbiter_runtime::arbiter_loop::ArbiterLoop;
//! use arbiter_types::{ArbiterConfig, Provenance, RawSignal};
//!
//! let (mut arbiter, handles) = ArbiterLoop::builder(ArbiterConfig::default(), executor).build()?;
//! handles.signals.send(RawSignal::new("hunger", 0.8, Provenance::Body))?;
//! let telemetry = arbiter.tick().await;
//! println!("{:?} via {:?}", telemetry.selected_goal, telemetry.selected_module);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use arbiter_kernel::{
    ApprovalHook, CapabilityExecutor, CapabilityGate, DegradationController, TickHealth, Watchdog,
};
use arbiter_middleware::{signal_channel, EventBus, GoalInbox, InboxReceiver, SignalReceiver, SignalSender};
use arbiter_perception::{NeedAggregator, NeedTable, SignalNormalizer, SignalSnapshot};
use arbiter_types::{
    ArbiterConfig, ArbiterError, BudgetClass, DegradationLevel, EventPayload, ExecutionRequest,
    GoalCandidate, GoalProposal, TickTelemetry, WorldState,
};
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::context::{CommitmentTable, TickContext};
use crate::goals::{FeasibilityChecker, GoalEnumerator, GoalLibrary};
use crate::loop_guard::StallGuard;
use crate::planners::{LlmPlanner, ReactivePlanner, ReflexPlanner, TemplatePlanner};
use crate::preemption::{PreemptionLadder, StepOutcome, Submission, TaskRequest};
use crate::priority::PriorityRanker;
use crate::router::{CognitiveRouter, Planner, PlanningTask};
use crate::telemetry;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Consecutive dispatch failures of one goal that count as a stall.
const STALL_THRESHOLD: usize = 3;

/// Requester recorded on every execution request the loop issues.
const REQUESTER: &str = "arbiter";

/// Watchdog component fed whenever a non-empty signal batch arrives.
pub const INGESTION_COMPONENT: &str = "ingestion";
/// Watchdog component fed whenever the executor answers.
pub const EXECUTOR_COMPONENT: &str = "executor";
/// Component blamed for preemptions that miss their overhead budget.
pub const PREEMPTION_COMPONENT: &str = "preemption";

// ─────────────────────────────────────────────────────────────────────────────
// Handles
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the outside world needs to talk to a running loop.
#[derive(Clone)]
pub struct ArbiterHandles {
    pub signals: SignalSender,
    pub inbox: GoalInbox,
    pub bus: EventBus,
    pub watchdog: Arc<Watchdog>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

pub struct ArbiterLoopBuilder {
    config: ArbiterConfig,
    executor: Arc<dyn CapabilityExecutor>,
    library: Option<GoalLibrary>,
    planners: Vec<Arc<dyn Planner>>,
    builtin_planners: bool,
    approval: Option<Arc<dyn ApprovalHook>>,
    world: WorldState,
    cancel_grace: Option<Duration>,
    bus_capacity: usize,
}

impl ArbiterLoopBuilder {
    /// Goal templates to enumerate from. Defaults to the demo library.
    pub fn library(mut self, library: GoalLibrary) -> Self {
        self.library = Some(library);
        self
    }

    /// Register an extra planner. Names must be unique across the router.
    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planners.push(planner);
        self
    }

    /// Skip the reflex, reactive, template and LLM planners.
    pub fn without_builtin_planners(mut self) -> Self {
        self.builtin_planners = false;
        self
    }

    pub fn approval_hook(mut self, hook: Arc<dyn ApprovalHook>) -> Self {
        self.approval = Some(hook);
        self
    }

    /// Initial world facts.
    pub fn world(mut self, world: WorldState) -> Self {
        self.world = world;
        self
    }

    /// How long a timed-out planner may take to wind down.
    pub fn cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = Some(grace);
        self
    }

    pub fn bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<(ArbiterLoop, ArbiterHandles), ArbiterError> {
        self.config.validate().map_err(ArbiterError::Config)?;
        let config = self.config;

        let library = Arc::new(self.library.unwrap_or_default());
        let watchdog = Arc::new(Watchdog::new());
        let component_timeout = Duration::from_millis(config.watchdog.component_timeout_ms);
        watchdog.register(INGESTION_COMPONENT, component_timeout);
        watchdog.register(EXECUTOR_COMPONENT, component_timeout);

        let mut gate = CapabilityGate::from_config(&config, self.executor)?;
        if let Some(hook) = self.approval {
            gate = gate.with_approval_hook(hook);
        }

        let mut router = CognitiveRouter::new(config.routing.clone(), Arc::clone(&watchdog));
        if let Some(grace) = self.cancel_grace {
            router = router.with_cancel_grace(grace);
        }
        let mut planners = self.planners;
        if self.builtin_planners {
            planners.push(Arc::new(ReflexPlanner));
            planners.push(Arc::new(ReactivePlanner::from_library(&library)));
            planners.push(Arc::new(TemplatePlanner::new(Arc::clone(&library))));
            if config.llm.enabled {
                planners.push(Arc::new(LlmPlanner::from_config(&config.llm, gate.registry().ids())));
            }
        }
        for planner in planners {
            router.register(planner)?;
        }

        let (signal_tx, signal_rx) = signal_channel(config.signals.channel_capacity);
        let (inbox, inbox_rx) = GoalInbox::new(&config.inbox)?;
        let bus = EventBus::new(self.bus_capacity);

        info!(
            planners = ?router.planner_names(),
            templates = library.iter().count(),
            tick_ms = config.tick_period_ms,
            "arbiter loop built"
        );

        let arbiter = ArbiterLoop {
            normalizer: SignalNormalizer::new(),
            aggregator: NeedAggregator::new(config.needs.clone()),
            enumerator: GoalEnumerator::new(config.needs.activation_threshold),
            feasibility: FeasibilityChecker::new(config.ranking.max_subgoal_depth),
            ranker: PriorityRanker::new(config.ranking.clone()),
            ladder: PreemptionLadder::new(config.preemption.clone()),
            degradation: DegradationController::new(config.watchdog.clone()),
            stall_guard: StallGuard::new(STALL_THRESHOLD),
            context: TickContext::initial(self.world),
            snapshot: SignalSnapshot::default(),
            last_ranking: Vec::new(),
            signals: signal_rx,
            inbox: inbox_rx,
            signals_dropped: 0,
            tick: 0,
            gate: Arc::new(gate),
            watchdog: Arc::clone(&watchdog),
            bus: bus.clone(),
            router,
            library,
            config,
        };
        let handles = ArbiterHandles { signals: signal_tx, inbox, bus, watchdog };
        Ok((arbiter, handles))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-tick scratch
// ─────────────────────────────────────────────────────────────────────────────

/// State threaded through one tick. Discarded once the next context is built.
struct TickScratch {
    telemetry: TickTelemetry,
    world: WorldState,
    needs: NeedTable,
    commitments: CommitmentTable,
    timed_out: bool,
    errored: bool,
}

impl TickScratch {
    /// Record a phase's latency; fail when it ran past `budget_ms`.
    fn close_phase(&mut self, phase: &str, started: Instant, budget_ms: u64) -> Result<(), ArbiterError> {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1e3;
        self.telemetry.latency_ms.insert(phase.to_string(), elapsed_ms);
        if elapsed_ms > budget_ms as f64 {
            return Err(ArbiterError::WatchdogTimeout { phase: phase.to_string(), elapsed_ms, budget_ms });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ArbiterLoop
// ─────────────────────────────────────────────────────────────────────────────

/// Owns every stage of the arbiter. Drive it with [`ArbiterLoop::tick`] or
/// [`ArbiterLoop::run`].
pub struct ArbiterLoop {
    config: ArbiterConfig,
    library: Arc<GoalLibrary>,
    normalizer: SignalNormalizer,
    aggregator: NeedAggregator,
    enumerator: GoalEnumerator,
    feasibility: FeasibilityChecker,
    ranker: PriorityRanker,
    router: CognitiveRouter,
    ladder: PreemptionLadder,
    gate: Arc<CapabilityGate>,
    watchdog: Arc<Watchdog>,
    degradation: DegradationController,
    stall_guard: StallGuard,
    bus: EventBus,
    signals: SignalReceiver,
    inbox: InboxReceiver,
    signals_dropped: u64,
    // ── Cross-tick state ─────────────────────────────────────────────────────
    context: TickContext,
    snapshot: SignalSnapshot,
    last_ranking: Vec<GoalCandidate>,
    tick: u64,
}

impl ArbiterLoop {
    pub fn builder(config: ArbiterConfig, executor: Arc<dyn CapabilityExecutor>) -> ArbiterLoopBuilder {
        ArbiterLoopBuilder {
            config,
            executor,
            library: None,
            planners: Vec::new(),
            builtin_planners: true,
            approval: None,
            world: WorldState::new(),
            cancel_grace: None,
            bus_capacity: 256,
        }
    }

    /// Context the next tick starts from.
    pub fn context(&self) -> &TickContext {
        &self.context
    }

    /// Signals seen by the most recent tick.
    pub fn snapshot(&self) -> &SignalSnapshot {
        &self.snapshot
    }

    /// Ranked, feasible candidates of the most recent tick, best first.
    pub fn last_ranking(&self) -> &[GoalCandidate] {
        &self.last_ranking
    }

    pub fn ladder(&self) -> &PreemptionLadder {
        &self.ladder
    }

    pub fn gate(&self) -> Arc<CapabilityGate> {
        Arc::clone(&self.gate)
    }

    pub fn degradation_level(&self) -> DegradationLevel {
        self.degradation.level()
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Run ticks every `tick_period_ms` until `shutdown` fires. Returns the
    /// number of ticks completed.
    pub async fn run(&mut self, shutdown: CancellationToken) -> u64 {
        let period = Duration::from_millis(self.config.tick_period_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let start = self.tick;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        info!(ticks = self.tick - start, "arbiter loop stopped");
        self.tick - start
    }

    /// Run one full tick and return its telemetry record.
    pub async fn tick(&mut self) -> TickTelemetry {
        self.tick += 1;
        let span = info_span!("tick", tick = self.tick, version = self.context.version);
        self.tick_inner().instrument(span).await
    }

    async fn tick_inner(&mut self) -> TickTelemetry {
        let started = Instant::now();
        let mut scratch = TickScratch {
            telemetry: TickTelemetry {
                tick: self.tick,
                context_version: self.context.version,
                ..Default::default()
            },
            world: self.context.world.clone(),
            needs: self.context.needs.clone(),
            commitments: self.context.commitments.clone(),
            timed_out: false,
            errored: false,
        };

        if let Err(err) = self.run_phases(&mut scratch).await {
            warn!(%err, "tick aborted");
            scratch.timed_out |= err.is_timeout();
            scratch.errored |= !err.is_timeout();
            scratch.telemetry.aborted = Some(err.to_string());
        }

        self.check_health(&mut scratch);
        scratch.telemetry.preemption_count = self.ladder.preemption_count();
        scratch.telemetry.safe_mode_state = self.degradation.level();
        scratch
            .telemetry
            .latency_ms
            .insert("total".to_string(), started.elapsed().as_secs_f64() * 1e3);

        self.context = self.context.advance(
            scratch.world,
            scratch.needs,
            &scratch.commitments,
            self.degradation.level(),
            &self.config.ranking,
        );
        debug!(
            goal = ?scratch.telemetry.selected_goal,
            module = ?scratch.telemetry.selected_module,
            rejections = scratch.telemetry.rejections.len(),
            "tick complete"
        );
        telemetry::emit(&self.bus, EventPayload::Tick(scratch.telemetry.clone()));
        scratch.telemetry
    }

    async fn run_phases(&mut self, scratch: &mut TickScratch) -> Result<(), ArbiterError> {
        let routine = self.config.budgets.for_class(BudgetClass::Routine);

        // ── 1. Ingest ─────────────────────────────────────────────────────────
        let phase = Instant::now();
        let proposals = self.ingest(scratch);
        scratch.close_phase("signal", phase, routine.signal_ms)?;

        // ── 2. Arbitrate ──────────────────────────────────────────────────────
        let phase = Instant::now();
        let ranked = self.arbitrate(scratch, proposals);
        scratch.close_phase("arbitration", phase, routine.arbitration_ms)?;

        // ── 3–4. Route and preempt ────────────────────────────────────────────
        let phase = Instant::now();
        let routing_budget = self.route_best(scratch, &ranked).await?;
        self.last_ranking = ranked;
        scratch.close_phase("routing", phase, routing_budget)?;

        // ── 5. Dispatch ───────────────────────────────────────────────────────
        self.dispatch(scratch).await
    }

    // ── Ingest ───────────────────────────────────────────────────────────────

    fn ingest(&mut self, scratch: &mut TickScratch) -> Vec<GoalProposal> {
        let batch = self.signals.drain();
        if !batch.is_empty() {
            self.watchdog.heartbeat(INGESTION_COMPONENT);
        }
        let dropped = self.signals.dropped();
        if dropped > self.signals_dropped {
            warn!(new = dropped - self.signals_dropped, total = dropped, "signals dropped since last tick");
            self.signals_dropped = dropped;
        }

        self.snapshot = self.normalizer.ingest(batch, Utc::now());
        scratch.needs = self.aggregator.aggregate(&self.snapshot, &self.context.needs);
        self.inbox.drain()
    }

    // ── Arbitrate ────────────────────────────────────────────────────────────

    fn arbitrate(&self, scratch: &mut TickScratch, proposals: Vec<GoalProposal>) -> Vec<GoalCandidate> {
        let mut candidates = Vec::new();
        for proposal in &proposals {
            if let Err(rejection) = self.gate.screen_goal(&proposal.template_ref, &proposal.tags) {
                warn!(
                    template = %proposal.template_ref,
                    source = %proposal.source,
                    rule = rejection.rule_id.as_deref().unwrap_or("-"),
                    reason = %rejection.reason,
                    "injected goal rejected by policy"
                );
                telemetry::emit(&self.bus, EventPayload::Rejected(rejection.clone()));
                scratch.telemetry.rejections.push(rejection);
                continue;
            }
            match self.enumerator.inject(&self.library, &scratch.needs, &scratch.world, proposal) {
                Ok(candidate) => candidates.push(candidate),
                Err(err) => warn!(template = %proposal.template_ref, %err, "injected goal dropped"),
            }
        }

        candidates.extend(self.enumerator.enumerate(&self.library, &scratch.needs, &scratch.world));
        let outcome = self.feasibility.check(&self.library, candidates, &scratch.world);
        for (candidate, err) in &outcome.infeasible {
            debug!(goal = %candidate.key(), %err, "candidate infeasible");
        }
        self.ranker.rank(outcome.feasible, &self.library, &scratch.needs, &scratch.commitments, &self.snapshot)
    }

    // ── Route and preempt ────────────────────────────────────────────────────

    /// Route the best goal the ladder can start now. Returns the routing
    /// budget that applied, so the caller can account for the phase.
    ///
    /// The phase budget is that of the first candidate tried; later
    /// candidates only get what is left of it.
    async fn route_best(&mut self, scratch: &mut TickScratch, ranked: &[GoalCandidate]) -> Result<u64, ArbiterError> {
        // Suspended work resumes before new goals of its own tier start.
        self.ladder.resume_waiting();
        let level = self.degradation.level();
        let started = Instant::now();
        let mut budget_ms = self.config.budgets.for_class(BudgetClass::Routine).routing_ms;
        let mut deadline: Option<Instant> = None;

        for candidate in ranked {
            let key = candidate.key();
            if self.ladder.holds(&key) {
                continue;
            }
            if !self.ladder.accepts(candidate.tier) {
                continue;
            }
            let class_budget = Duration::from_millis(
                self.config.budgets.for_class(candidate.tier.budget_class()).routing_ms,
            );
            let phase_deadline = match deadline {
                Some(deadline) => deadline,
                None => {
                    budget_ms = class_budget.as_millis() as u64;
                    *deadline.insert(started + class_budget)
                }
            };
            let remaining = phase_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(goal = %key, "routing budget spent, leaving remaining candidates");
                break;
            }
            let task = PlanningTask::new(
                candidate.clone(),
                self.library.get(&candidate.template_ref).cloned(),
                scratch.world.clone(),
            );
            let routed = match self.router.route(task, class_budget.min(remaining), level).await {
                Ok(routed) => routed,
                Err(failure) => {
                    scratch.timed_out |= failure.timed_out();
                    warn!(goal = %key, attempts = failure.failures.len(), "no planner produced a plan");
                    continue;
                }
            };
            scratch.timed_out |= routed.failures.iter().any(ArbiterError::is_timeout);

            scratch.telemetry.selected_goal = Some(key.clone());
            scratch.telemetry.selected_module = Some(routed.module.clone());
            let request = TaskRequest {
                goal_key: key,
                tier: candidate.tier,
                priority: candidate.priority,
                module: routed.module,
                plan: routed.plan,
            };
            self.submit(request)?;
            return Ok(budget_ms);
        }

        if let Some(running) = self.ladder.running() {
            scratch.telemetry.selected_goal = Some(running.goal_key.clone());
            scratch.telemetry.selected_module = Some(running.module.clone());
        }
        Ok(budget_ms)
    }

    fn submit(&mut self, request: TaskRequest) -> Result<(), ArbiterError> {
        match self.ladder.submit(request)? {
            Submission::Preempted { task, victim, overhead, within_sla } => {
                if !within_sla {
                    self.watchdog.report_fault(
                        PREEMPTION_COMPONENT,
                        format!("preemption took {:.2} ms", overhead.as_secs_f64() * 1e3),
                    );
                }
                telemetry::emit(
                    &self.bus,
                    EventPayload::Preempted { task: victim, by: task, overhead_ms: overhead.as_secs_f64() * 1e3 },
                );
            }
            Submission::Started(_) | Submission::Queued(_) | Submission::AlreadyHeld(_) => {}
        }
        Ok(())
    }

    // ── Dispatch ─────────────────────────────────────────────────────────────

    async fn dispatch(&mut self, scratch: &mut TickScratch) -> Result<(), ArbiterError> {
        let Some(step) = self.ladder.next_step() else {
            return Ok(());
        };
        let budget_ms = self.config.budgets.for_class(step.tier.budget_class()).execution_ms;
        let request = ExecutionRequest::from_action(&step.action, step.goal_id, REQUESTER);
        let phase = Instant::now();

        // The gate bounds attempts, retries and compensation by the budget,
        // so a step is never abandoned with its effects half applied.
        let outcome = self.gate.submit_within(&request, &scratch.world, Duration::from_millis(budget_ms)).await;
        let elapsed_ms = phase.elapsed().as_secs_f64() * 1e3;
        scratch.telemetry.latency_ms.insert("execution".to_string(), elapsed_ms);

        match outcome {
            Ok(result) => {
                self.watchdog.heartbeat(EXECUTOR_COMPONENT);
                scratch.world.apply_all(&result.effects_applied);
                scratch.commitments.commit(step.goal_key.clone(), self.config.ranking.commitment_boost);
                self.stall_guard.record_success();
                if let Some(StepOutcome::Completed(task)) = self.ladder.complete_step(step.task, true) {
                    debug!(goal = %task.goal_key, steps = task.plan.steps.len(), "plan finished");
                }
                info!(
                    goal = %step.goal_key,
                    capability = %step.action.capability,
                    step = step.index,
                    attempts = result.attempts,
                    "step executed"
                );
            }
            Err(err) => {
                let overran = elapsed_ms > budget_ms as f64;
                if let Some(rejection) = err.rejection() {
                    if matches!(err, ArbiterError::PolicyViolation(_)) {
                        telemetry::emit(&self.bus, EventPayload::Rejected(rejection.clone()));
                    }
                    scratch.telemetry.rejections.push(rejection.clone());
                } else if !overran {
                    self.watchdog.heartbeat(EXECUTOR_COMPONENT);
                    scratch.errored = true;
                }
                warn!(goal = %step.goal_key, capability = %step.action.capability, %err, "step failed");
                self.ladder.complete_step(step.task, false);
                self.record_failure(scratch, &step.goal_key);
                if overran {
                    return Err(ArbiterError::WatchdogTimeout { phase: "execution".to_string(), elapsed_ms, budget_ms });
                }
            }
        }
        Ok(())
    }

    fn record_failure(&mut self, scratch: &mut TickScratch, goal_key: &str) {
        if self.stall_guard.record_failure(goal_key) {
            scratch.commitments.revoke(goal_key);
            self.watchdog.report_fault(goal_key, "goal keeps failing dispatch");
        }
    }

    // ── Health ───────────────────────────────────────────────────────────────

    fn check_health(&mut self, scratch: &mut TickScratch) {
        let faults = self.watchdog.take_faults();
        for fault in &faults {
            telemetry::emit(
                &self.bus,
                EventPayload::ComponentFault { component: fault.component.clone(), message: fault.message.clone() },
            );
        }
        let sample = TickHealth {
            timed_out: scratch.timed_out,
            errored: scratch.errored || !faults.is_empty(),
            resource_pressure: self.ladder.pressure(),
            frozen_components: self.watchdog.frozen(),
        };
        if let Some(transition) = self.degradation.record(sample) {
            self.gate.set_safe_mode(transition.to == DegradationLevel::SafeMode);
            telemetry::emit(
                &self.bus,
                EventPayload::Degradation { from: transition.from, to: transition.to, reason: transition.reason },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_kernel::ExecutorOutcome;
    use arbiter_middleware::Topic;
    use arbiter_types::{CapabilitySpec, NeedKind, Provenance, RawSignal};
    use async_trait::async_trait;

    /// Applies each capability's declared effects.
    struct EffectExecutor;

    #[async_trait]
    impl CapabilityExecutor for EffectExecutor {
        async fn execute(&self, _request: &ExecutionRequest, spec: &CapabilitySpec) -> Result<ExecutorOutcome, ArbiterError> {
            Ok(ExecutorOutcome::succeeded(spec.effects.clone(), Vec::new()))
        }
    }

    fn build() -> (ArbiterLoop, ArbiterHandles) {
        ArbiterLoop::builder(ArbiterConfig::default(), Arc::new(EffectExecutor)).build().unwrap()
    }

    #[tokio::test]
    async fn quiet_tick_runs_the_idle_goal() {
        let (mut arbiter, _handles) = build();
        let telemetry = arbiter.tick().await;
        assert_eq!(telemetry.tick, 1);
        assert_eq!(telemetry.selected_goal.as_deref(), Some("idle"));
        assert!(telemetry.aborted.is_none());
        assert!(telemetry.latency_ms.contains_key("signal"));
        assert!(telemetry.latency_ms.contains_key("total"));
        assert_eq!(arbiter.context().version, 1);
    }

    #[tokio::test]
    async fn effects_of_dispatched_steps_reach_the_next_context() {
        let (mut arbiter, handles) = build();
        handles.signals.send(RawSignal::new("hunger", 0.8, Provenance::Body)).unwrap();
        let telemetry = arbiter.tick().await;
        // No food: eat is infeasible and its gather subgoal runs instead.
        let key = "gather{amount=1,resource=food}";
        assert_eq!(telemetry.selected_goal.as_deref(), Some(key));
        assert_eq!(telemetry.selected_module.as_deref(), Some("template"));
        assert_eq!(arbiter.context().world.value("food"), 1.0);
        assert!(arbiter.context().commitments.get(key) > 0.0);
    }

    #[tokio::test]
    async fn tick_telemetry_is_published_on_the_bus() {
        let (mut arbiter, handles) = build();
        let mut rx = handles.bus.subscribe_to(Topic::Telemetry);
        arbiter.tick().await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event.payload, EventPayload::Tick(t) if t.tick == 1));
    }

    #[tokio::test]
    async fn policy_screen_drops_denied_proposals() {
        let (mut arbiter, handles) = build();
        handles
            .inbox
            .submit(GoalProposal {
                template_ref: "attack_player".into(),
                bindings: Default::default(),
                need: NeedKind::Safety,
                tier: None,
                tags: Vec::new(),
                source: "peer".into(),
            })
            .unwrap();
        let telemetry = arbiter.tick().await;
        assert_eq!(telemetry.rejections.len(), 1);
        assert_eq!(telemetry.rejections[0].rule_id.as_deref(), Some("no-pvp"));
        assert!(arbiter.last_ranking().iter().all(|c| c.template_ref != "attack_player"));
    }

    #[tokio::test]
    async fn invalid_config_is_refused() {
        let mut config = ArbiterConfig::default();
        config.capabilities.push(CapabilitySpec::new("flee", arbiter_types::RiskLevel::Low));
        let err = ArbiterLoop::builder(config, Arc::new(EffectExecutor)).build().err().unwrap();
        assert!(matches!(err, ArbiterError::Config(_)));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let mut config = ArbiterConfig::default();
        config.tick_period_ms = 5;
        let (mut arbiter, _handles) =
            ArbiterLoop::builder(config, Arc::new(EffectExecutor)).build().unwrap();
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            trigger.cancel();
        });
        let ticks = arbiter.run(shutdown).await;
        assert!(ticks >= 1);
    }
}
