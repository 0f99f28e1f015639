//! Headless demo world for running the arbiter without a game client.
//!
//! [`SimWorld`] is a [`CapabilityExecutor`] over an in-memory fact table;
//! [`ScriptedSource`] is a [`SignalSource`] that walks a day/night cycle,
//! lets the agent get hungrier every step and sends a hostile towards it
//! after dusk. The source reads the same fact table the executor writes, so
//! eating lowers hunger and hiding damps the threat on the next step.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arbiter_kernel::{CapabilityExecutor, ExecutorOutcome};
use arbiter_middleware::SignalSource;
use arbiter_types::{ArbiterError, CapabilitySpec, Effect, ExecutionRequest, Provenance, RawSignal, WorldState};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tracing::debug;

/// Satiety lost per simulation step.
const SATIETY_DRIFT: f64 = 0.02;
/// Fraction of the threat that still registers while hidden.
const HIDDEN_EXPOSURE: f64 = 0.25;

/// Facts the demo world starts from.
pub fn demo_world() -> WorldState {
    WorldState::new()
        .with("satiety", 0.6)
        .with("food", 0.0)
        .with("wood", 0.0)
        .with("tool_condition", 1.0)
        .with("structures", 0.0)
        .with("explored", 0.0)
        .with("hidden", 0.0)
}

// ────────────────────────────────────────────────────────────────────────────
// Executor
// ────────────────────────────────────────────────────────────────────────────

/// In-memory world the arbiter acts on. Every execution succeeds and
/// applies the request's effects followed by the capability's own.
pub struct SimWorld {
    state: Mutex<WorldState>,
}

impl SimWorld {
    pub fn new(initial: WorldState) -> Self {
        Self { state: Mutex::new(initial) }
    }

    pub fn snapshot(&self) -> WorldState {
        self.lock().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut WorldState)) {
        f(&mut self.lock());
    }

    fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl CapabilityExecutor for SimWorld {
    async fn execute(&self, request: &ExecutionRequest, spec: &CapabilitySpec) -> Result<ExecutorOutcome, ArbiterError> {
        let mut effects = request.effects.clone();
        effects.extend(spec.effects.iter().cloned());
        let inverse = self.lock().apply_all(&effects);
        debug!(capability = %spec.id, effects = effects.len(), "sim executed capability");
        Ok(ExecutorOutcome::succeeded(effects, inverse))
    }

    async fn compensate(&self, capability: &str, inverse: &[Effect]) -> Result<(), ArbiterError> {
        self.lock().apply_all(inverse);
        debug!(capability, "sim compensated capability");
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Signal source
// ────────────────────────────────────────────────────────────────────────────

/// Scripted sensor feed over a [`SimWorld`].
#[derive(Clone)]
pub struct ScriptedSource {
    world: Arc<SimWorld>,
    period: Duration,
    day_length: u64,
    limit: Option<u64>,
}

impl ScriptedSource {
    /// One batch of readings every `period`; a full day lasts `day_length`
    /// steps, the second half of it being night.
    pub fn new(world: Arc<SimWorld>, period: Duration, day_length: u64) -> Self {
        Self { world, period, day_length: day_length.max(2), limit: None }
    }

    /// End the stream after `steps` batches.
    pub fn with_limit(mut self, steps: u64) -> Self {
        self.limit = Some(steps);
        self
    }

    fn is_night(&self, step: u64) -> bool {
        step % self.day_length >= self.day_length / 2
    }

    /// Apply the passive world drift for `step`.
    fn advance(&self, step: u64) {
        let dawn = step > 0 && step % self.day_length == 0;
        self.world.update(|w| {
            w.set("satiety", (w.value("satiety") - SATIETY_DRIFT).max(0.0));
            if dawn {
                w.set("hidden", 0.0);
            }
        });
    }

    /// The readings observed at `step`, derived from the current world.
    pub fn readings(&self, step: u64) -> Vec<RawSignal> {
        let world = self.world.snapshot();
        let dusk = self.day_length / 2;
        let phase = step % self.day_length;

        let hostile = if self.is_night(step) {
            let ramp = ((phase - dusk + 1) as f64 / (self.day_length - dusk) as f64).min(1.0);
            if world.value("hidden") >= 1.0 { ramp * HIDDEN_EXPOSURE } else { ramp }
        } else {
            0.0
        };
        let unfinished = if world.value("structures") < 1.0 { 0.5 } else { 0.1 };

        vec![
            RawSignal::new("night", if self.is_night(step) { 1.0 } else { 0.0 }, Provenance::Env),
            RawSignal::new("hostile_proximity", hostile, Provenance::Intrusion),
            RawSignal::new("hunger", (1.0 - world.value("satiety")).clamp(0.0, 1.0), Provenance::Body),
            RawSignal::new("unexplored_area", 1.0 / (1.0 + world.value("explored")), Provenance::Memory),
            RawSignal::new("unfinished_work", unfinished, Provenance::Memory),
            RawSignal::new("tool_wear", (1.0 - world.value("tool_condition")).clamp(0.0, 1.0), Provenance::Body),
        ]
    }
}

#[async_trait]
impl SignalSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted-sim"
    }

    async fn signal_stream(&self) -> BoxStream<'static, RawSignal> {
        let this = self.clone();
        stream::unfold(0u64, move |step| {
            let this = this.clone();
            async move {
                if this.limit.is_some_and(|limit| step >= limit) {
                    return None;
                }
                if step > 0 {
                    tokio::time::sleep(this.period).await;
                }
                this.advance(step);
                Some((this.readings(step), step + 1))
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }
}
