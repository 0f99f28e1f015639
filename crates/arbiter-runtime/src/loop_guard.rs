//! [`StallGuard`] – detects a goal that keeps failing dispatch.
//!
//! The commitment boost rewards goals the arbiter already started, which is
//! exactly what keeps a broken goal at the top of the ranking. The guard
//! keeps a rolling window of the last `threshold` dispatch failures; when
//! they all name the same goal, [`StallGuard::record_failure`] returns `true`
//! and the loop revokes that goal's commitment and reports the stall to the
//! watchdog. Any successful dispatch clears the window.
//!
//! # Example
//!
//! ```rust
//! use arbiter_runtime::loop_guard::StallGuard;
//!
//! let mut guard = StallGuard::new(3);
//!
//! assert!(!guard.record_failure("eat"));
//! assert!(!guard.record_failure("eat"));
//! assert!(guard.record_failure("eat")); // third failure in a row
//!
//! guard.record_success();
//! assert!(!guard.record_failure("eat"));
//! ```

use std::collections::VecDeque;

pub struct StallGuard {
    threshold: usize,
    history: VecDeque<String>,
}

impl StallGuard {
    /// `threshold` consecutive failures of one goal count as a stall.
    pub fn new(threshold: usize) -> Self {
        Self { threshold: threshold.max(1), history: VecDeque::with_capacity(threshold) }
    }

    /// Record that dispatching `goal_key` failed. Returns `true` when the
    /// goal is stalled.
    pub fn record_failure(&mut self, goal_key: &str) -> bool {
        self.history.push_back(goal_key.to_string());
        while self.history.len() > self.threshold {
            self.history.pop_front();
        }
        self.stalled().is_some()
    }

    pub fn record_success(&mut self) {
        self.history.clear();
    }

    /// The stalled goal, if the window is full of one goal key.
    pub fn stalled(&self) -> Option<&str> {
        if self.history.len() < self.threshold {
            return None;
        }
        let first = &self.history[0];
        self.history.iter().all(|g| g == first).then_some(first.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn different_goals_do_not_stall() {
        let mut guard = StallGuard::new(3);
        assert!(!guard.record_failure("eat"));
        assert!(!guard.record_failure("repair"));
        assert!(!guard.record_failure("eat"));
    }

    #[test]
    fn stall_persists_until_success() {
        let mut guard = StallGuard::new(2);
        guard.record_failure("build_shelter");
        assert!(guard.record_failure("build_shelter"));
        assert!(guard.record_failure("build_shelter"));
        assert_eq!(guard.stalled(), Some("build_shelter"));
        guard.record_success();
        assert_eq!(guard.stalled(), None);
    }

    #[test]
    fn window_slides_past_old_failures() {
        let mut guard = StallGuard::new(3);
        guard.record_failure("a");
        guard.record_failure("b");
        guard.record_failure("c");
        guard.record_failure("c");
        assert!(guard.record_failure("c"));
    }

    #[test]
    fn zero_threshold_is_treated_as_one() {
        let mut guard = StallGuard::new(0);
        assert!(guard.record_failure("eat"));
    }
}
