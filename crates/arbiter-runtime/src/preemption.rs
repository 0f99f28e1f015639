//! [`PreemptionLadder`] – owns running and suspended tasks.
//!
//! ```text
//! QUEUED ──► RUNNING ──► COMPLETED
//!              │   └───► FAILED
//!              ▼
//!          PREEMPTED ──(runner idle)──► QUEUED
//! ```
//!
//! A request at tier *k* preempts a running task at a tier numerically
//! greater than *k*, immediately; it never preempts a task at tier ≤ *k*.
//! Stopping the victim and capturing its [`PreemptionState`] is measured
//! against `overhead_budget_ms`, a hard SLA: a breach is reported in the
//! returned [`Submission`] so the caller can hand it to the watchdog.
//!
//! Only one task runs at a time; the arbiter loop pulls one step per tick
//! with [`PreemptionLadder::next_step`] and reports back with
//! [`PreemptionLadder::complete_step`].

use std::time::{Duration, Instant};

use arbiter_types::config::PreemptionConfig;
use arbiter_types::{Action, ArbiterError, Plan, PriorityTier};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Preempted,
    Failed,
}

/// Snapshot of a suspended task, sufficient to resume it.
#[derive(Debug, Clone, PartialEq)]
pub struct PreemptionState {
    pub plan: Plan,
    /// Index of the next step to run.
    pub cursor: usize,
    pub preempted_at: Instant,
    pub preempted_by: Uuid,
}

/// A routed plan handed to the ladder.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub goal_key: String,
    pub tier: PriorityTier,
    pub priority: f64,
    /// Planner module that produced the plan.
    pub module: String,
    pub plan: Plan,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub goal_key: String,
    pub tier: PriorityTier,
    pub priority: f64,
    pub module: String,
    pub plan: Plan,
    pub cursor: usize,
    pub state: TaskState,
    pub resume: Option<PreemptionState>,
    seq: u64,
}

impl Task {
    pub fn current_step(&self) -> Option<&Action> {
        self.plan.steps.get(self.cursor)
    }

    pub fn remaining_steps(&self) -> usize {
        self.plan.steps.len().saturating_sub(self.cursor)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The ladder was idle; the task runs now.
    Started(Uuid),
    /// Waiting behind a task of equal or higher tier.
    Queued(Uuid),
    /// `victim` was suspended for `task`.
    Preempted {
        task: Uuid,
        victim: Uuid,
        overhead: Duration,
        within_sla: bool,
    },
    /// A task for this goal is already running or waiting.
    AlreadyHeld(Uuid),
}

/// Step handed to the dispatcher.
#[derive(Debug, Clone)]
pub struct NextStep {
    pub task: Uuid,
    pub goal_id: Uuid,
    pub goal_key: String,
    pub tier: PriorityTier,
    pub index: usize,
    pub action: Action,
}

#[derive(Debug)]
pub enum StepOutcome {
    Advanced,
    Completed(Task),
    Failed(Task),
}

pub struct PreemptionLadder {
    config: PreemptionConfig,
    running: Option<Task>,
    queue: Vec<Task>,
    next_seq: u64,
    preemptions: u64,
}

impl PreemptionLadder {
    pub fn new(config: PreemptionConfig) -> Self {
        Self { config, running: None, queue: Vec::new(), next_seq: 0, preemptions: 0 }
    }

    pub fn running(&self) -> Option<&Task> {
        self.running.as_ref()
    }

    pub fn queued(&self) -> impl Iterator<Item = &Task> {
        self.queue.iter()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queue occupancy in `[0, 1]`.
    pub fn pressure(&self) -> f64 {
        if self.config.queue_limit == 0 {
            return 1.0;
        }
        (self.queue.len() as f64 / self.config.queue_limit as f64).min(1.0)
    }

    pub fn preemption_count(&self) -> u64 {
        self.preemptions
    }

    pub fn state_of(&self, task: Uuid) -> Option<TaskState> {
        self.running
            .iter()
            .chain(self.queue.iter())
            .find(|t| t.id == task)
            .map(|t| t.state)
    }

    pub fn holds(&self, goal_key: &str) -> bool {
        self.running.iter().chain(self.queue.iter()).any(|t| t.goal_key == goal_key)
    }

    /// Whether a request at `tier` would run now (idle ladder or preemption).
    pub fn accepts(&self, tier: PriorityTier) -> bool {
        self.running.as_ref().is_none_or(|r| tier.preempts(r.tier))
    }

    pub fn submit(&mut self, request: TaskRequest) -> Result<Submission, ArbiterError> {
        if let Some(held) = self.running.iter().chain(self.queue.iter()).find(|t| t.goal_key == request.goal_key) {
            return Ok(Submission::AlreadyHeld(held.id));
        }

        let preempts = self.running.as_ref().map(|r| request.tier.preempts(r.tier));
        match preempts {
            None => {
                let task = self.task(request, TaskState::Running);
                let id = task.id;
                info!(task = %id, goal = %task.goal_key, tier = ?task.tier, "task started");
                self.running = Some(task);
                Ok(Submission::Started(id))
            }
            Some(true) => Ok(self.preempt(request)),
            Some(false) => {
                if self.queue.len() >= self.config.queue_limit {
                    return Err(ArbiterError::Preemption(format!(
                        "queue full ({} tasks), cannot queue {}",
                        self.queue.len(),
                        request.goal_key
                    )));
                }
                let task = self.task(request, TaskState::Queued);
                let id = task.id;
                debug!(task = %id, goal = %task.goal_key, "task queued");
                self.queue.push(task);
                Ok(Submission::Queued(id))
            }
        }
    }

    fn task(&mut self, request: TaskRequest, state: TaskState) -> Task {
        self.next_seq += 1;
        Task {
            id: Uuid::new_v4(),
            goal_key: request.goal_key,
            tier: request.tier,
            priority: request.priority,
            module: request.module,
            plan: request.plan,
            cursor: 0,
            state,
            resume: None,
            seq: self.next_seq,
        }
    }

    /// Suspend the running task and start `request` in its place.
    fn preempt(&mut self, request: TaskRequest) -> Submission {
        let started = Instant::now();
        let incoming = self.task(request, TaskState::Running);
        let Some(mut victim) = self.running.take() else {
            let id = incoming.id;
            self.running = Some(incoming);
            return Submission::Started(id);
        };

        victim.state = TaskState::Preempted;
        victim.resume = Some(PreemptionState {
            plan: victim.plan.clone(),
            cursor: victim.cursor,
            preempted_at: started,
            preempted_by: incoming.id,
        });
        if self.queue.len() >= self.config.queue_limit {
            self.evict_worst();
        }
        let victim_id = victim.id;
        self.queue.push(victim);
        let task = incoming.id;
        self.running = Some(incoming);
        self.preemptions += 1;

        let overhead = started.elapsed();
        let within_sla = overhead.as_secs_f64() * 1e3 <= self.config.overhead_budget_ms;
        if within_sla {
            info!(%task, victim = %victim_id, overhead_us = overhead.as_micros() as u64, "task preempted");
        } else {
            warn!(%task, victim = %victim_id, overhead_ms = overhead.as_secs_f64() * 1e3, budget_ms = self.config.overhead_budget_ms, "preemption overhead exceeded its budget");
        }
        Submission::Preempted { task, victim: victim_id, overhead, within_sla }
    }

    /// Drop the lowest-ranked waiting task to make room for a preempted one.
    fn evict_worst(&mut self) {
        self.sort_queue();
        if let Some(dropped) = self.queue.pop() {
            warn!(task = %dropped.id, goal = %dropped.goal_key, "queue full, dropping lowest-ranked task");
        }
    }

    fn sort_queue(&mut self) {
        self.queue.sort_by(|a, b| {
            a.tier
                .cmp(&b.tier)
                .then(b.priority.total_cmp(&a.priority))
                .then(a.seq.cmp(&b.seq))
        });
    }

    /// When nothing runs, put suspended tasks back to `QUEUED` and resume or
    /// start the best waiting task. Returns the task now running, if any.
    pub fn resume_waiting(&mut self) -> Option<Uuid> {
        if self.running.is_none() && !self.queue.is_empty() {
            for task in &mut self.queue {
                if task.state == TaskState::Preempted {
                    task.state = TaskState::Queued;
                }
            }
            self.sort_queue();
            let mut task = self.queue.remove(0);
            if let Some(state) = task.resume.take() {
                debug!(task = %task.id, cursor = state.cursor, "resuming preempted task");
                task.plan = state.plan;
                task.cursor = state.cursor;
            }
            task.state = TaskState::Running;
            self.running = Some(task);
        }
        self.running.as_ref().map(|t| t.id)
    }

    /// Next step to dispatch, resuming waiting work first.
    pub fn next_step(&mut self) -> Option<NextStep> {
        self.resume_waiting();
        let task = self.running.as_ref()?;
        let action = task.current_step()?.clone();
        Some(NextStep {
            task: task.id,
            goal_id: task.plan.goal_id,
            goal_key: task.goal_key.clone(),
            tier: task.tier,
            index: task.cursor,
            action,
        })
    }

    /// Report the outcome of the step handed out by [`Self::next_step`].
    /// Returns `None` when `task` is not the running task.
    pub fn complete_step(&mut self, task: Uuid, success: bool) -> Option<StepOutcome> {
        let running = self.running.as_mut().filter(|r| r.id == task)?;
        if !success {
            running.state = TaskState::Failed;
            let failed = self.running.take()?;
            warn!(task = %failed.id, goal = %failed.goal_key, step = failed.cursor, "task failed");
            return Some(StepOutcome::Failed(failed));
        }
        running.cursor += 1;
        if running.cursor < running.plan.steps.len() {
            return Some(StepOutcome::Advanced);
        }
        running.state = TaskState::Completed;
        let done = self.running.take()?;
        info!(task = %done.id, goal = %done.goal_key, "task completed");
        Some(StepOutcome::Completed(done))
    }
}
