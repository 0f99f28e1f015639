//! Built-in planners, one per rung of the degradation ladder.
//!
//! | Planner | Tier | Answers with |
//! |---|---|---|
//! | [`LlmPlanner`] | deliberative | a plan drafted by an OpenAI-compatible model |
//! | [`TemplatePlanner`] | structured | the goal template's plan hint, bindings substituted |
//! | [`ReactivePlanner`] | reactive | a single capability looked up by template |
//! | [`ReflexPlanner`] | reflex | `flee` for safety goals, `wait` otherwise |

pub mod llm;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arbiter_types::{Action, NeedKind, Plan, TaskSignature};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::goals::{bind_action, GoalLibrary};
use crate::router::{Planner, PlannerError, PlannerTier, PlanningTask};

pub use llm::LlmPlanner;

// ────────────────────────────────────────────────────────────────────────────
// Reflex
// ────────────────────────────────────────────────────────────────────────────

/// Hard-coded last resort. Handles everything, instantly.
#[derive(Debug, Default)]
pub struct ReflexPlanner;

#[async_trait]
impl Planner for ReflexPlanner {
    fn name(&self) -> &str {
        "reflex"
    }

    fn tier(&self) -> PlannerTier {
        PlannerTier::Reflex
    }

    fn can_handle(&self, _signature: &TaskSignature) -> bool {
        true
    }

    fn estimate_processing_time(&self, _task: &PlanningTask) -> Duration {
        Duration::from_micros(50)
    }

    async fn process(&self, task: PlanningTask, _cancel: CancellationToken) -> Result<Plan, PlannerError> {
        let step = match task.candidate.need {
            NeedKind::Safety => Action::invoke("flee").with_param("speed", 1.0),
            _ => Action::invoke("wait"),
        };
        Ok(Plan { goal_id: task.candidate.id, steps: vec![step], confidence: 0.3 })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Reactive
// ────────────────────────────────────────────────────────────────────────────

/// Goal template → one capability. No lookahead.
#[derive(Debug, Default)]
pub struct ReactivePlanner {
    table: BTreeMap<String, Action>,
}

impl ReactivePlanner {
    pub fn new(table: BTreeMap<String, Action>) -> Self {
        Self { table }
    }

    /// First plan-hint step of every template in `library`.
    pub fn from_library(library: &GoalLibrary) -> Self {
        let table = library
            .iter()
            .filter_map(|t| t.plan_hint.first().map(|a| (t.name.clone(), a.clone())))
            .collect();
        Self { table }
    }
}

#[async_trait]
impl Planner for ReactivePlanner {
    fn name(&self) -> &str {
        "reactive"
    }

    fn tier(&self) -> PlannerTier {
        PlannerTier::Reactive
    }

    fn can_handle(&self, signature: &TaskSignature) -> bool {
        self.table.contains_key(&signature.template)
    }

    fn estimate_processing_time(&self, _task: &PlanningTask) -> Duration {
        Duration::from_millis(1)
    }

    async fn process(&self, task: PlanningTask, _cancel: CancellationToken) -> Result<Plan, PlannerError> {
        let action = self
            .table
            .get(&task.candidate.template_ref)
            .ok_or_else(|| PlannerError::Unsupported(task.candidate.template_ref.clone()))?;
        Ok(Plan {
            goal_id: task.candidate.id,
            steps: vec![bind_action(action, &task.candidate.bindings)],
            confidence: 0.6,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Template
// ────────────────────────────────────────────────────────────────────────────

/// Expands the template's plan hint.
pub struct TemplatePlanner {
    library: Arc<GoalLibrary>,
}

impl TemplatePlanner {
    pub fn new(library: Arc<GoalLibrary>) -> Self {
        Self { library }
    }
}

#[async_trait]
impl Planner for TemplatePlanner {
    fn name(&self) -> &str {
        "template"
    }

    fn tier(&self) -> PlannerTier {
        PlannerTier::Structured
    }

    fn can_handle(&self, signature: &TaskSignature) -> bool {
        self.library.get(&signature.template).is_some_and(|t| !t.plan_hint.is_empty())
    }

    fn estimate_processing_time(&self, _task: &PlanningTask) -> Duration {
        Duration::from_millis(3)
    }

    async fn process(&self, task: PlanningTask, cancel: CancellationToken) -> Result<Plan, PlannerError> {
        if cancel.is_cancelled() {
            return Err(PlannerError::Cancelled);
        }
        let template = self
            .library
            .get(&task.candidate.template_ref)
            .ok_or_else(|| PlannerError::Unsupported(task.candidate.template_ref.clone()))?;
        let steps = template.expand_hint(&task.candidate.bindings);
        if steps.is_empty() {
            return Err(PlannerError::Failed(format!("template '{}' has no plan hint", template.name)));
        }
        Ok(Plan { goal_id: task.candidate.id, steps, confidence: 0.8 })
    }
}
