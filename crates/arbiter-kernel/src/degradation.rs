//! [`DegradationController`] – the graceful-degradation state machine.
//!
//! ```text
//! FULL → DEGRADED(reasoning) → DEGRADED(planning) → BASIC → SAFE_MODE
//! ```
//!
//! | Trigger (within the sliding window) | Edge |
//! |---|---|
//! | timeouts ≥ `timeout_threshold` | one step down |
//! | erroring ticks / window ≥ `error_rate_threshold` (full window) | one step down |
//! | resource pressure ≥ `resource_exhaustion_threshold` | straight to `SAFE_MODE` |
//!
//! The window is cleared after every step down, so one burst of failures
//! costs one level. The only way back up is restoration: `restore_after_ticks`
//! consecutive healthy ticks (no timeout, no error, no frozen component,
//! pressure under the threshold) raise the level by exactly one step.

use std::collections::VecDeque;

use arbiter_types::DegradationLevel;
use arbiter_types::config::WatchdogConfig;
use tracing::{info, warn};

/// Health sample for one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickHealth {
    /// A phase exceeded its budget or a planner timed out.
    pub timed_out: bool,
    /// Any non-timeout failure: execution failure, reported fault.
    pub errored: bool,
    /// Resource pressure in `[0, 1]` (queue saturation, memory, …).
    pub resource_pressure: f64,
    /// Components past their heartbeat deadline.
    pub frozen_components: Vec<String>,
}

impl TickHealth {
    pub fn is_healthy(&self, exhaustion_threshold: f64) -> bool {
        !self.timed_out
            && !self.errored
            && self.frozen_components.is_empty()
            && self.resource_pressure < exhaustion_threshold
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: DegradationLevel,
    pub to: DegradationLevel,
    pub reason: String,
}

pub struct DegradationController {
    config: WatchdogConfig,
    level: DegradationLevel,
    window: VecDeque<TickHealth>,
    healthy_streak: u32,
}

impl DegradationController {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window_ticks.max(1)),
            config,
            level: DegradationLevel::Full,
            healthy_streak: 0,
        }
    }

    pub fn level(&self) -> DegradationLevel {
        self.level
    }

    /// Feed one tick's health sample. Returns the transition, if any.
    pub fn record(&mut self, sample: TickHealth) -> Option<Transition> {
        let healthy = sample.is_healthy(self.config.resource_exhaustion_threshold);
        let exhausted = sample.resource_pressure >= self.config.resource_exhaustion_threshold;

        if self.window.len() >= self.config.window_ticks.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(sample);

        if exhausted && self.level != DegradationLevel::SafeMode {
            return Some(self.transition(DegradationLevel::SafeMode, "resource exhaustion".to_string()));
        }

        let timeouts = self.window.iter().filter(|s| s.timed_out).count() as u32;
        if timeouts >= self.config.timeout_threshold && self.level != DegradationLevel::SafeMode {
            let to = self.level.step_down();
            return Some(self.transition(to, format!("{timeouts} timeouts in window")));
        }

        if self.window.len() >= self.config.window_ticks.max(1) {
            let errors = self.window.iter().filter(|s| s.errored || !s.frozen_components.is_empty()).count();
            let rate = errors as f64 / self.window.len() as f64;
            if rate >= self.config.error_rate_threshold && self.level != DegradationLevel::SafeMode {
                let to = self.level.step_down();
                return Some(self.transition(to, format!("error rate {rate:.2} in window")));
            }
        }

        if healthy {
            self.healthy_streak += 1;
            if self.healthy_streak >= self.config.restore_after_ticks && self.level != DegradationLevel::Full {
                let to = self.level.step_up();
                let reason = format!("{} consecutive healthy ticks", self.healthy_streak);
                return Some(self.transition(to, reason));
            }
        } else {
            self.healthy_streak = 0;
        }
        None
    }

    fn transition(&mut self, to: DegradationLevel, reason: String) -> Transition {
        let from = self.level;
        self.level = to;
        self.window.clear();
        self.healthy_streak = 0;
        if to > from {
            warn!(%from, %to, %reason, "degrading");
        } else {
            info!(%from, %to, %reason, "restoring");
        }
        Transition { from, to, reason }
    }
}
