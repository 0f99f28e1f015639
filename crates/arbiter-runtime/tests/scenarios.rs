//! End-to-end scenarios driving the full tick loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arbiter_kernel::{CapabilityExecutor, ExecutorOutcome};
use arbiter_middleware::Topic;
use arbiter_runtime::arbiter_loop::ArbiterLoop;
use arbiter_runtime::preemption::{PreemptionLadder, StepOutcome, Submission, TaskRequest, TaskState};
use arbiter_runtime::router::{CANCELLATION_IGNORED, Planner, PlannerError, PlannerTier, PlanningTask};
use arbiter_types::config::{PreemptionConfig, RoutingRule, SignaturePattern};
use arbiter_types::{
    Action, ArbiterConfig, ArbiterError, BudgetClass, CapabilitySpec, DegradationLevel, Effect,
    EventPayload, ExecutionRequest, GoalProposal, NeedKind, Plan, PriorityTier, Provenance,
    RawSignal, TaskSignature, WorldState,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// Applies declared effects to a shared world and records every capability.
#[derive(Default)]
struct SharedWorldExecutor {
    world: Mutex<WorldState>,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl CapabilityExecutor for SharedWorldExecutor {
    async fn execute(&self, request: &ExecutionRequest, spec: &CapabilitySpec) -> Result<ExecutorOutcome, ArbiterError> {
        self.seen.lock().unwrap().push(request.capability.clone());
        let inverse = self.world.lock().unwrap().apply_all(&spec.effects);
        Ok(ExecutorOutcome::succeeded(spec.effects.clone(), inverse))
    }

    async fn compensate(&self, _capability: &str, inverse: &[Effect]) -> Result<(), ArbiterError> {
        self.world.lock().unwrap().apply_all(inverse);
        Ok(())
    }
}

/// A structured-tier planner that never answers in time.
struct StuckPlanner {
    name: &'static str,
    /// Block the worker thread instead of awaiting.
    blocking: bool,
    estimate_ms: u64,
}

#[async_trait]
impl Planner for StuckPlanner {
    fn name(&self) -> &str {
        self.name
    }

    fn tier(&self) -> PlannerTier {
        PlannerTier::Structured
    }

    fn can_handle(&self, _signature: &TaskSignature) -> bool {
        true
    }

    fn estimate_processing_time(&self, _task: &PlanningTask) -> Duration {
        Duration::from_millis(self.estimate_ms)
    }

    async fn process(&self, task: PlanningTask, _cancel: CancellationToken) -> Result<Plan, PlannerError> {
        if self.blocking {
            std::thread::sleep(Duration::from_millis(300));
        } else {
            std::future::pending::<()>().await;
        }
        Ok(Plan { goal_id: task.candidate.id, steps: vec![Action::invoke("wait")], confidence: 1.0 })
    }
}

fn raw(name: &str, value: f64) -> RawSignal {
    RawSignal::new(name, value, Provenance::Env)
}

fn proposal(template: &str) -> GoalProposal {
    GoalProposal {
        template_ref: template.into(),
        bindings: Default::default(),
        need: NeedKind::Progress,
        tier: None,
        tags: Vec::new(),
        source: "peer-agent".into(),
    }
}

/// Routine goals go to `module` first.
fn prefer_for_routine(config: &mut ArbiterConfig, module: &str) {
    let routine = SignaturePattern { class: Some(BudgetClass::Routine), ..Default::default() };
    config.routing.insert(0, RoutingRule::new(routine, module, 0.99));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario A: danger at night outranks hunger
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn safety_outranks_hunger_and_routes_to_a_fast_planner() {
    let executor = Arc::new(SharedWorldExecutor::default());
    let (mut arbiter, handles) = ArbiterLoop::builder(ArbiterConfig::default(), executor.clone()).build().unwrap();

    handles.signals.send(raw("night", 0.9)).unwrap();
    handles.signals.send(RawSignal::new("hunger", 0.8, Provenance::Body)).unwrap();
    handles.signals.send(raw("hostile_proximity", 0.9)).unwrap();

    let telemetry = arbiter.tick().await;

    let ranking = arbiter.last_ranking();
    assert_eq!(ranking[0].need, NeedKind::Safety);
    let best_nutrition = ranking.iter().position(|c| c.need == NeedKind::Nutrition).expect("nutrition candidate");
    assert!(ranking[..best_nutrition].iter().all(|c| c.need == NeedKind::Safety));

    // The LLM (800 ms estimate) cannot fit the 20 ms emergency budget.
    assert_eq!(telemetry.selected_module.as_deref(), Some("reactive"));
    assert!(telemetry.latency_ms["routing"] < 20.0);
    assert!(telemetry.aborted.is_none());
    let seen = executor.seen.lock().unwrap().clone();
    assert!(seen == vec!["hide".to_string()] || seen == vec!["flee".to_string()], "dispatched {seen:?}");
}

/// Answers the first call only after `delay`, every later one at once.
struct SlowOnce {
    inner: SharedWorldExecutor,
    delay: Duration,
    calls: AtomicU32,
}

#[async_trait]
impl CapabilityExecutor for SlowOnce {
    async fn execute(&self, request: &ExecutionRequest, spec: &CapabilitySpec) -> Result<ExecutorOutcome, ArbiterError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.execute(request, spec).await
    }

    async fn compensate(&self, capability: &str, inverse: &[Effect]) -> Result<(), ArbiterError> {
        self.inner.compensate(capability, inverse).await
    }
}

#[tokio::test]
async fn slow_safety_step_is_retried_within_the_emergency_budget() {
    let mut config = ArbiterConfig::default();
    for spec in &mut config.capabilities {
        spec.idempotent = true;
    }
    let budget_ms = config.budgets.for_class(BudgetClass::Emergency).execution_ms;
    let executor = Arc::new(SlowOnce {
        inner: SharedWorldExecutor::default(),
        delay: Duration::from_millis(60),
        calls: AtomicU32::new(0),
    });
    let (mut arbiter, handles) = ArbiterLoop::builder(config, executor.clone()).build().unwrap();

    handles.signals.send(raw("hostile_proximity", 0.95)).unwrap();
    let telemetry = arbiter.tick().await;

    assert!(telemetry.aborted.is_none(), "aborted: {:?}", telemetry.aborted);
    assert!(executor.calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(executor.inner.seen.lock().unwrap().len(), 1);
    assert!(telemetry.latency_ms["execution"] <= budget_ms as f64 + 5.0);
    let goal = telemetry.selected_goal.expect("a safety goal was selected");
    assert!(arbiter.context().commitments.get(&goal) > 0.0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario B: denied proposals never reach feasibility
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn denied_proposals_are_rejected_with_their_rule_id() {
    let executor = Arc::new(SharedWorldExecutor::default());
    let (mut arbiter, handles) = ArbiterLoop::builder(ArbiterConfig::default(), executor.clone()).build().unwrap();
    let mut alerts = handles.bus.subscribe_to(Topic::SystemAlerts);

    handles.inbox.submit(proposal("attack_player")).unwrap();
    handles.inbox.submit(proposal("destroy_village")).unwrap();
    let telemetry = arbiter.tick().await;

    let rules: Vec<_> = telemetry.rejections.iter().filter_map(|r| r.rule_id.clone()).collect();
    assert_eq!(rules, vec!["no-pvp".to_string(), "no-griefing".to_string()]);
    assert!(arbiter.last_ranking().iter().all(|c| c.origin != arbiter_types::GoalOrigin::Injected));

    let mut alerted = Vec::new();
    while let Ok(event) = alerts.try_recv() {
        if let EventPayload::Rejected(r) = event.payload {
            alerted.push(r.subject);
        }
    }
    assert_eq!(alerted, vec!["attack_player".to_string(), "destroy_village".to_string()]);
    assert!(!executor.seen.lock().unwrap().iter().any(|c| c.starts_with("attack") || c.starts_with("destroy")));
}

#[tokio::test]
async fn allowed_proposals_join_the_ranking() {
    let mut config = ArbiterConfig::default();
    config.llm.enabled = false;
    let (mut arbiter, handles) =
        ArbiterLoop::builder(config, Arc::new(SharedWorldExecutor::default())).build().unwrap();
    handles.inbox.submit(proposal("explore")).unwrap();
    arbiter.tick().await;
    assert!(
        arbiter
            .last_ranking()
            .iter()
            .any(|c| c.template_ref == "explore" && c.origin == arbiter_types::GoalOrigin::Injected)
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario C: a planner that never returns
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn hanging_planner_is_cancelled_and_the_tick_falls_back() {
    let mut config = ArbiterConfig::default();
    prefer_for_routine(&mut config, "stuck");
    config.watchdog.timeout_threshold = 1;
    let (mut arbiter, handles) = ArbiterLoop::builder(config, Arc::new(SharedWorldExecutor::default()))
        .planner(Arc::new(StuckPlanner { name: "stuck", blocking: false, estimate_ms: 5 }))
        .build()
        .unwrap();
    let mut alerts = handles.bus.subscribe_to(Topic::SystemAlerts);

    handles.signals.send(RawSignal::new("hunger", 0.8, Provenance::Body)).unwrap();
    let telemetry = arbiter.tick().await;

    assert_eq!(telemetry.selected_module.as_deref(), Some("template"));
    assert!(telemetry.aborted.is_none());
    assert!(telemetry.latency_ms["routing"] < 75.0, "routing took {:?}", telemetry.latency_ms["routing"]);

    // One timeout with a threshold of one steps the loop down a level.
    assert_eq!(arbiter.degradation_level(), DegradationLevel::DegradedReasoning);
    let mut degraded = false;
    while let Ok(event) = alerts.try_recv() {
        degraded |= matches!(event.payload, EventPayload::Degradation { to: DegradationLevel::DegradedReasoning, .. });
    }
    assert!(degraded);
}

#[tokio::test]
async fn routing_phase_shares_one_budget_across_candidates() {
    let mut config = ArbiterConfig::default();
    config.llm.enabled = false;
    let budget_ms = config.budgets.for_class(BudgetClass::Routine).routing_ms;
    let (mut arbiter, handles) = ArbiterLoop::builder(config, Arc::new(SharedWorldExecutor::default()))
        .without_builtin_planners()
        .planner(Arc::new(StuckPlanner { name: "stuck", blocking: false, estimate_ms: 30 }))
        .build()
        .unwrap();

    handles.signals.send(RawSignal::new("hunger", 0.8, Provenance::Body)).unwrap();
    handles.signals.send(raw("unfinished_work", 0.9)).unwrap();
    let telemetry = arbiter.tick().await;

    assert!(arbiter.last_ranking().len() >= 2, "{:?}", arbiter.last_ranking());
    assert!(telemetry.selected_module.is_none());
    assert!(
        telemetry.latency_ms["routing"] < budget_ms as f64,
        "routing took {:?} of {budget_ms} ms",
        telemetry.latency_ms["routing"]
    );
    assert!(telemetry.aborted.is_none(), "aborted: {:?}", telemetry.aborted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn planner_ignoring_cancellation_is_reported_as_a_fault() {
    let mut config = ArbiterConfig::default();
    prefer_for_routine(&mut config, "blocker");
    let (mut arbiter, handles) = ArbiterLoop::builder(config, Arc::new(SharedWorldExecutor::default()))
        .planner(Arc::new(StuckPlanner { name: "blocker", blocking: true, estimate_ms: 5 }))
        .cancel_grace(Duration::from_millis(2))
        .build()
        .unwrap();
    let mut alerts = handles.bus.subscribe_to(Topic::SystemAlerts);

    handles.signals.send(RawSignal::new("hunger", 0.8, Provenance::Body)).unwrap();
    let telemetry = arbiter.tick().await;
    assert_eq!(telemetry.selected_module.as_deref(), Some("template"));

    let mut faults = Vec::new();
    while let Ok(event) = alerts.try_recv() {
        if let EventPayload::ComponentFault { component, message } = event.payload {
            faults.push((component, message));
        }
    }
    assert!(faults.contains(&("planner:blocker".to_string(), CANCELLATION_IGNORED.to_string())), "{faults:?}");
}

// ─────────────────────────────────────────────────────────────────────────────
// Preemption
// ─────────────────────────────────────────────────────────────────────────────

fn request(goal: &str, tier: PriorityTier, steps: &[&str]) -> TaskRequest {
    TaskRequest {
        goal_key: goal.to_string(),
        tier,
        priority: 0.5,
        module: "template".to_string(),
        plan: Plan {
            goal_id: Uuid::new_v4(),
            steps: steps.iter().map(|s| Action::invoke(*s)).collect(),
            confidence: 1.0,
        },
    }
}

#[test]
fn reflex_preempts_exploration_within_budget_and_exploration_resumes() {
    let config = PreemptionConfig::default();
    let budget_ms = config.overhead_budget_ms;
    let mut ladder = PreemptionLadder::new(config);

    let Submission::Started(explore) = ladder.submit(request("explore", PriorityTier::Exploration, &["walk", "look", "map"])).unwrap()
    else {
        panic!("idle ladder should start the task");
    };
    let step = ladder.next_step().unwrap();
    assert!(matches!(ladder.complete_step(step.task, true), Some(StepOutcome::Advanced)));

    let submission = ladder.submit(request("flee", PriorityTier::SafetyReflex, &["flee"])).unwrap();
    let Submission::Preempted { victim, overhead, within_sla, .. } = submission else {
        panic!("expected preemption, got {submission:?}");
    };
    assert_eq!(victim, explore);
    assert!(within_sla);
    assert!(overhead.as_secs_f64() * 1e3 <= budget_ms);
    assert_eq!(ladder.state_of(explore), Some(TaskState::Preempted));

    let flee = ladder.next_step().unwrap();
    assert_eq!(flee.action.capability, "flee");
    assert!(matches!(ladder.complete_step(flee.task, true), Some(StepOutcome::Completed(_))));

    let resumed = ladder.next_step().unwrap();
    assert_eq!(resumed.task, explore);
    assert_eq!(resumed.index, 1);
    assert_eq!(resumed.action.capability, "look");
}

#[tokio::test]
async fn loop_preempts_a_multi_step_plan_and_resumes_it() {
    let mut config = ArbiterConfig::default();
    config.llm.enabled = false;
    for spec in &mut config.capabilities {
        if spec.id == "gather_wood" {
            spec.cooldown_ms = 0;
        }
    }
    let executor = Arc::new(SharedWorldExecutor::default());
    let (mut arbiter, handles) = ArbiterLoop::builder(config, executor.clone()).build().unwrap();
    let mut decisions = handles.bus.subscribe_to(Topic::Decisions);

    // Unfinished work with no wood: build_shelter needs a four-step gather.
    handles.signals.send(raw("unfinished_work", 0.9)).unwrap();
    let first = arbiter.tick().await;
    let gather = "gather{amount=4,resource=wood}";
    assert_eq!(first.selected_goal.as_deref(), Some(gather));
    assert_eq!(arbiter.context().world.value("wood"), 1.0);

    handles.signals.send(raw("night", 0.9)).unwrap();
    handles.signals.send(raw("hostile_proximity", 0.9)).unwrap();
    let second = arbiter.tick().await;
    assert_eq!(second.preemption_count, 1);
    assert!(matches!(decisions.try_recv().unwrap().payload, EventPayload::Preempted { .. }));
    assert_eq!(arbiter.ladder().running().map(|t| t.tier), None);
    assert_eq!(arbiter.ladder().queued().next().map(|t| t.goal_key.as_str()), Some(gather));

    // Danger gone: the suspended gather picks up at its second step.
    handles.signals.send(raw("hostile_proximity", 0.0)).unwrap();
    handles.signals.send(raw("night", 0.0)).unwrap();
    let third = arbiter.tick().await;
    assert_eq!(third.selected_goal.as_deref(), Some(gather));
    assert_eq!(arbiter.context().world.value("wood"), 2.0);
    assert_eq!(arbiter.ladder().running().map(|t| t.cursor), Some(2));
}

// ─────────────────────────────────────────────────────────────────────────────
// Determinism
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn identical_inputs_rank_identically() {
    let signals = [
        ("night", 0.7),
        ("hunger", 0.55),
        ("hostile_proximity", 0.3),
        ("unfinished_work", 0.6),
        ("isolation", 0.4),
        ("tool_wear", 0.5),
    ];
    let mut rankings = Vec::new();
    for _ in 0..2 {
        let (mut arbiter, handles) =
            ArbiterLoop::builder(ArbiterConfig::default(), Arc::new(SharedWorldExecutor::default())).build().unwrap();
        for (name, value) in signals {
            handles.signals.send(raw(name, value)).unwrap();
        }
        arbiter.tick().await;
        let ranking: Vec<(String, f64)> =
            arbiter.last_ranking().iter().map(|c| (c.key(), c.priority)).collect();
        assert!(ranking.iter().all(|(_, p)| p.is_finite()));
        rankings.push(ranking);
    }
    assert_eq!(rankings[0], rankings[1]);
}
