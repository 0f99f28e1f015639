//! [`CapabilityGate`] – single interception point between the arbiter and the
//! executor.
//!
//! Every [`ExecutionRequest`] passes through [`CapabilityGate::validate`]
//! before it may reach a [`CapabilityExecutor`]. The stages are mandatory,
//! run in this order, and stop at the first failure:
//!
//! 1. **Precondition** – the capability is registered and its preconditions
//!    (plus the plan step's own) hold in the current [`WorldState`].
//! 2. **Policy** – constitutional rules via [`PolicyEngine`]; `MODIFY`
//!    corrections are applied to the request here.
//! 3. **Rate limit** – cooldown and concurrency via [`CapabilityRegistry`].
//! 4. **Sandbox** – declared risk against the configured ceiling.
//! 5. **Approval** – capabilities tagged `requires_approval` wait, within
//!    budget, for the [`ApprovalHook`].
//!
//! A failure is a [`Rejection`] naming the stage and, where one applies, the
//! rule id. On success, [`CapabilityGate::execute`] runs the request under the
//! capability's hard timeout and retries idempotent capabilities. Partial
//! effects of failed reversible capabilities are compensated, and successful
//! ones journal a rollback token.
//!
//! [`CapabilityGate::submit_within`] additionally bounds the whole execution
//! by a caller budget: each attempt gets at most its share of what remains,
//! and an attempt cut off mid-flight is compensated with the inverse
//! predicted at admission.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use arbiter_types::config::{ApprovalDefault, ArbiterConfig, GateConfig};
use arbiter_types::{
    ArbiterError, CapabilitySpec, Effect, ExecutionRequest, ExecutionResult, GateStage, Rejection,
    RollbackToken, RuleEvaluation, WorldState, REQUIRES_APPROVAL_TAG,
};
use tracing::{debug, info, warn};

use crate::approval::{ApprovalDecision, ApprovalHook};
use crate::capability_registry::{CapabilityRegistry, RatePermit};
use crate::executor::{CapabilityExecutor, ExecutorOutcome};
use crate::policy::{PolicyDecision, PolicyEngine, PolicySubject};
use crate::rollback::{Claim, RollbackJournal};

/// A request that passed every validation stage and holds its rate-limit
/// reservation until it is executed or dropped.
#[derive(Debug)]
pub struct Admission {
    /// The request after policy corrections.
    pub request: ExecutionRequest,
    pub warnings: Vec<String>,
    pub trace: Vec<RuleEvaluation>,
    /// Inverse of the declared effects against the admission world, used
    /// when an attempt is cut off before the executor reports its own.
    compensation: Vec<Effect>,
    permit: RatePermit,
}

impl Admission {
    pub fn admitted_at(&self) -> Instant {
        self.permit.admitted_at()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RollbackOutcome {
    /// The inverse effects were applied now.
    Applied(Vec<Effect>),
    /// An earlier call already rolled this token back; nothing changed.
    AlreadyRolledBack,
}

pub struct CapabilityGate {
    registry: CapabilityRegistry,
    policy: PolicyEngine,
    journal: RollbackJournal,
    executor: Arc<dyn CapabilityExecutor>,
    approval: Option<Arc<dyn ApprovalHook>>,
    config: GateConfig,
    safe_mode: AtomicBool,
}

impl CapabilityGate {
    pub fn new(
        registry: CapabilityRegistry,
        policy: PolicyEngine,
        executor: Arc<dyn CapabilityExecutor>,
        config: GateConfig,
    ) -> Self {
        Self {
            registry,
            policy,
            journal: RollbackJournal::new(),
            executor,
            approval: None,
            config,
            safe_mode: AtomicBool::new(false),
        }
    }

    /// Build the registry and policy engine from a full configuration.
    pub fn from_config(config: &ArbiterConfig, executor: Arc<dyn CapabilityExecutor>) -> Result<Self, ArbiterError> {
        let registry = CapabilityRegistry::new(config.capabilities.clone())?;
        let policy = PolicyEngine::from_config(&config.policy);
        Ok(Self::new(registry, policy, executor, config.gate.clone()))
    }

    pub fn with_approval_hook(mut self, hook: Arc<dyn ApprovalHook>) -> Self {
        self.approval = Some(hook);
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn journal(&self) -> &RollbackJournal {
        &self.journal
    }

    /// Switch allow-list-only mode on or off. Driven by the degradation
    /// controller.
    pub fn set_safe_mode(&self, enabled: bool) {
        if self.safe_mode.swap(enabled, Ordering::SeqCst) != enabled {
            info!(enabled, "capability gate safe mode changed");
        }
    }

    pub fn safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::SeqCst)
    }

    /// Policy screen for a goal proposal, run before any feasibility work.
    pub fn screen_goal(&self, template: &str, tags: &[String]) -> Result<PolicyDecision, Rejection> {
        self.policy.evaluate(&PolicySubject::goal(template, tags), false)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Validation
    // ────────────────────────────────────────────────────────────────────────

    /// Run every validation stage against `request`.
    pub async fn validate(&self, request: &ExecutionRequest, world: &WorldState) -> Result<Admission, Rejection> {
        let subject = request.capability.as_str();

        // 1. Precondition
        let Some(spec) = self.registry.spec(subject) else {
            return Err(Rejection::new(subject, GateStage::Precondition, "capability is not registered"));
        };
        let conditions: Vec<_> = spec.preconditions.iter().chain(request.preconditions.iter()).cloned().collect();
        if let Some(unmet) = world.first_unmet(&conditions) {
            debug!(capability = %subject, fact = %unmet.fact, "precondition unmet");
            return Err(Rejection::new(
                subject,
                GateStage::Precondition,
                format!("{} {:?} {} does not hold (current {})", unmet.fact, unmet.cmp, unmet.value, world.value(&unmet.fact)),
            ));
        }

        // 2. Policy
        let decision = self
            .policy
            .evaluate(&PolicySubject::action(request, spec), self.safe_mode())?;
        let mut corrected = request.clone();
        decision.apply_corrections(&mut corrected.params);

        // 3. Rate limit
        let permit = self
            .registry
            .try_reserve(subject)
            .map_err(|reason| Rejection::new(subject, GateStage::RateLimit, reason))?;

        // 4. Sandbox
        if spec.risk_level > self.config.max_risk {
            permit.revoke();
            return Err(Rejection::new(
                subject,
                GateStage::Sandbox,
                format!("risk {:?} exceeds ceiling {:?}", spec.risk_level, self.config.max_risk),
            ));
        }

        // 5. Approval
        if (spec.has_tag(REQUIRES_APPROVAL_TAG) || corrected.tags.iter().any(|t| t == REQUIRES_APPROVAL_TAG))
            && let Err(reason) = self.await_approval(&corrected, spec).await
        {
            permit.revoke();
            return Err(Rejection::new(subject, GateStage::Approval, reason));
        }

        let compensation = if spec.reversible {
            let declared: Vec<Effect> = corrected.effects.iter().chain(spec.effects.iter()).cloned().collect();
            world.clone().apply_all(&declared)
        } else {
            Vec::new()
        };

        Ok(Admission { request: corrected, warnings: decision.warnings, trace: decision.trace, compensation, permit })
    }

    async fn await_approval(&self, request: &ExecutionRequest, spec: &CapabilitySpec) -> Result<(), String> {
        let fallback = |why: &str| match self.config.approval_default {
            ApprovalDefault::Allow => {
                warn!(capability = %request.capability, why, "approval defaulted to allow");
                Ok(())
            }
            ApprovalDefault::Deny => Err(format!("{why}; default action is deny")),
        };

        let Some(hook) = &self.approval else {
            return fallback("no approver configured");
        };
        let budget = Duration::from_millis(self.config.approval_timeout_ms);
        match tokio::time::timeout(budget, hook.request_approval(request, spec)).await {
            Ok(ApprovalDecision::Approved) => Ok(()),
            Ok(ApprovalDecision::Denied(reason)) => Err(reason),
            Err(_) => fallback(&format!("approval not received within {} ms", self.config.approval_timeout_ms)),
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Execution
    // ────────────────────────────────────────────────────────────────────────

    /// Dispatch an admitted request.
    pub async fn execute(&self, admission: Admission) -> Result<ExecutionResult, ArbiterError> {
        self.run_attempts(admission, None).await
    }

    /// Dispatch an admitted request, finishing every attempt, retry and
    /// compensation within `budget`.
    pub async fn execute_within(&self, admission: Admission, budget: Duration) -> Result<ExecutionResult, ArbiterError> {
        self.run_attempts(admission, Some(budget)).await
    }

    async fn run_attempts(&self, admission: Admission, budget: Option<Duration>) -> Result<ExecutionResult, ArbiterError> {
        let Admission { request, warnings, compensation, permit, .. } = admission;
        let spec = self
            .registry
            .spec(&request.capability)
            .ok_or_else(|| ArbiterError::UnknownCapability(request.capability.clone()))?;

        let max_attempts = if spec.idempotent { 1 + self.config.execution_retries } else { 1 };
        let hard_timeout = Duration::from_millis(spec.timeout_ms);
        let started = Instant::now();
        let deadline = budget.map(|b| started + b);
        let mut attempts = 0;
        let mut reason = String::new();

        for attempt in 1..=max_attempts {
            let timeout = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        reason = if reason.is_empty() {
                            "execution budget exhausted before dispatch".to_string()
                        } else {
                            format!("{reason}; execution budget exhausted")
                        };
                        break;
                    }
                    hard_timeout.min(remaining / (max_attempts - attempt + 1))
                }
                None => hard_timeout,
            };
            attempts = attempt;

            let (outcome, cut_off) = match tokio::time::timeout(timeout, self.executor.execute(&request, spec)).await {
                Ok(Ok(outcome)) => (outcome, false),
                Ok(Err(e)) => (ExecutorOutcome::failed(e.to_string()), false),
                Err(_) => (ExecutorOutcome::failed(format!("timed out after {} ms", timeout.as_millis())), true),
            };

            if outcome.success {
                let rollback_token = spec
                    .reversible
                    .then(|| self.journal.record(&request.capability, outcome.inverse.clone()));
                debug!(capability = %request.capability, attempt, ?rollback_token, "capability executed");
                return Ok(ExecutionResult {
                    request_id: request.id,
                    capability: request.capability.clone(),
                    success: true,
                    effects_applied: outcome.effects_applied,
                    rollback_token,
                    duration_ms: started.elapsed().as_secs_f64() * 1_000.0,
                    attempts: attempt,
                    warnings,
                    admitted_at: permit.admitted_at(),
                });
            }

            reason = outcome.message.clone().unwrap_or_else(|| "executor reported failure".to_string());
            warn!(capability = %request.capability, attempt, max_attempts, %reason, "capability attempt failed");

            if !spec.reversible {
                continue;
            }
            // A cut-off executor never reports what it applied.
            let inverse = if cut_off { &compensation } else { &outcome.inverse };
            if !inverse.is_empty() {
                self.compensate(&request.capability, inverse, hard_timeout).await;
            }
        }

        Err(ArbiterError::CapabilityExecutionFailure { capability: request.capability.clone(), attempts, reason })
    }

    async fn compensate(&self, capability: &str, inverse: &[Effect], timeout: Duration) {
        match tokio::time::timeout(timeout, self.executor.compensate(capability, inverse)).await {
            Ok(Ok(())) => debug!(capability, effects = inverse.len(), "partial effects compensated"),
            Ok(Err(e)) => warn!(capability, error = %e, "compensation of partial effects failed"),
            Err(_) => warn!(capability, timeout_ms = timeout.as_millis() as u64, "compensation timed out"),
        }
    }

    /// Validate then execute.
    pub async fn submit(&self, request: &ExecutionRequest, world: &WorldState) -> Result<ExecutionResult, ArbiterError> {
        let admission = self.validate(request, world).await.map_err(ArbiterError::from_rejection)?;
        self.execute(admission).await
    }

    /// Validate then execute within `budget`. Validation time counts against
    /// the budget.
    pub async fn submit_within(
        &self,
        request: &ExecutionRequest,
        world: &WorldState,
        budget: Duration,
    ) -> Result<ExecutionResult, ArbiterError> {
        let started = Instant::now();
        let admission = self.validate(request, world).await.map_err(ArbiterError::from_rejection)?;
        self.execute_within(admission, budget.saturating_sub(started.elapsed())).await
    }

    // ────────────────────────────────────────────────────────────────────────
    // Rollback
    // ────────────────────────────────────────────────────────────────────────

    /// Undo a reversible execution. Calling this twice with the same token
    /// leaves the world as one call did.
    pub async fn rollback(&self, token: RollbackToken) -> Result<RollbackOutcome, ArbiterError> {
        match self.journal.claim(token) {
            Claim::Unknown => Err(ArbiterError::CapabilityExecutionFailure {
                capability: token.to_string(),
                attempts: 0,
                reason: "unknown rollback token".to_string(),
            }),
            Claim::AlreadyClaimed => {
                debug!(%token, "rollback already performed");
                Ok(RollbackOutcome::AlreadyRolledBack)
            }
            Claim::Apply { capability, inverse } => {
                match self.executor.compensate(&capability, &inverse).await {
                    Ok(()) => {
                        self.journal.complete(token);
                        info!(%token, %capability, "rolled back");
                        Ok(RollbackOutcome::Applied(inverse))
                    }
                    Err(e) => {
                        self.journal.release(token);
                        Err(e)
                    }
                }
            }
        }
    }
}
