//! [`Watchdog`] – component heartbeats and fault reports.
//!
//! Planners, the executor and the ingestion pump call
//! [`Watchdog::heartbeat`] while they are alive. A component whose deadline
//! passes is *frozen*; the arbiter loop folds frozen components and reported
//! faults (e.g. a planner that ignored cancellation) into the per-tick health
//! sample fed to the [`DegradationController`][crate::degradation::DegradationController].
//!
//! The watchdog is shared behind an `Arc` and locks internally, so
//! heartbeats can come from any task.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::warn;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentHealth {
    Healthy,
    TimedOut,
}

/// A fault reported since the last [`Watchdog::take_faults`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub component: String,
    pub message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal entry
// ────────────────────────────────────────────────────────────────────────────

struct ComponentEntry {
    last_heartbeat: Instant,
    timeout: Duration,
}

#[derive(Default)]
struct Inner {
    components: BTreeMap<String, ComponentEntry>,
    faults: Vec<Fault>,
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// # Example
///
/// ```
/// use std::time::Duration;
/// use arbiter_kernel::watchdog::{Watchdog, ComponentHealth};
///
/// let wd = Watchdog::new();
/// wd.register("planner:llm", Duration::from_secs(1));
/// wd.heartbeat("planner:llm");
///
/// assert_eq!(wd.health("planner:llm"), ComponentHealth::Healthy);
/// ```
#[derive(Default)]
pub struct Watchdog {
    inner: Mutex<Inner>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("watchdog lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Register `component` with a heartbeat `timeout`. It starts healthy;
    /// re-registering resets the deadline.
    pub fn register(&self, component: &str, timeout: Duration) {
        self.inner().components.insert(
            component.to_string(),
            ComponentEntry { last_heartbeat: Instant::now(), timeout },
        );
    }

    /// No-op for unregistered components.
    pub fn heartbeat(&self, component: &str) {
        if let Some(entry) = self.inner().components.get_mut(component) {
            entry.last_heartbeat = Instant::now();
        }
    }

    /// Unknown components report [`ComponentHealth::TimedOut`].
    pub fn health(&self, component: &str) -> ComponentHealth {
        match self.inner().components.get(component) {
            Some(entry) if entry.last_heartbeat.elapsed() <= entry.timeout => ComponentHealth::Healthy,
            _ => ComponentHealth::TimedOut,
        }
    }

    /// Ids of all components past their deadline, sorted.
    pub fn frozen(&self) -> Vec<String> {
        self.inner()
            .components
            .iter()
            .filter(|(_, entry)| entry.last_heartbeat.elapsed() > entry.timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn report_fault(&self, component: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(component, %message, "component fault reported");
        self.inner().faults.push(Fault { component: component.to_string(), message });
    }

    /// Drain faults reported since the previous call.
    pub fn take_faults(&self) -> Vec<Fault> {
        std::mem::take(&mut self.inner().faults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fresh_component_is_healthy() {
        let wd = Watchdog::new();
        wd.register("executor", Duration::from_secs(5));
        assert_eq!(wd.health("executor"), ComponentHealth::Healthy);
    }

    #[test]
    fn heartbeat_resets_deadline() {
        let wd = Watchdog::new();
        wd.register("ingestion", Duration::from_millis(40));
        thread::sleep(Duration::from_millis(25));
        wd.heartbeat("ingestion");
        thread::sleep(Duration::from_millis(25));
        assert_eq!(wd.health("ingestion"), ComponentHealth::Healthy);
    }

    #[test]
    fn silent_component_is_reported_frozen() {
        let wd = Watchdog::new();
        wd.register("planner:llm", Duration::from_millis(20));
        wd.register("planner:reflex", Duration::from_secs(60));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(wd.health("planner:llm"), ComponentHealth::TimedOut);
        assert_eq!(wd.frozen(), vec!["planner:llm".to_string()]);
    }

    #[test]
    fn unknown_component_is_timed_out_and_heartbeat_is_noop() {
        let wd = Watchdog::new();
        wd.heartbeat("ghost");
        assert_eq!(wd.health("ghost"), ComponentHealth::TimedOut);
        assert!(wd.frozen().is_empty());
    }

    #[test]
    fn faults_are_drained_once() {
        let wd = Watchdog::new();
        wd.report_fault("planner:llm", "CancellationIgnored");
        let faults = wd.take_faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].message, "CancellationIgnored");
        assert!(wd.take_faults().is_empty());
    }
}
