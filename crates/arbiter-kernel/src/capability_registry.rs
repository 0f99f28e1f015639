//! [`CapabilityRegistry`] – the capability table and its rate-limit counters.
//!
//! Specs are registered once at startup and are read-only afterwards. The
//! only mutable state is a small counter block per capability (time of the
//! last admission, executions in flight), each behind its own
//! [`Mutex`], so two different capabilities never contend.
//!
//! # Example
//!
//! ```
//! use arbiter_kernel::capability_registry::CapabilityRegistry;
//! use arbiter_types::{CapabilitySpec, RiskLevel};
//!
//! let registry = CapabilityRegistry::new(vec![
//!     CapabilitySpec::new("eat", RiskLevel::Low).with_cooldown_ms(60_000),
//! ])
//! .unwrap();
//!
//! let first = registry.try_reserve("eat");
//! assert!(first.is_ok());
//! // Still cooling down.
//! assert!(registry.try_reserve("eat").is_err());
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use arbiter_types::{ArbiterError, CapabilitySpec};
use tracing::warn;

// ────────────────────────────────────────────────────────────────────────────
// Internal entry
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RateCounters {
    last_admitted: Option<Instant>,
    in_flight: u32,
}

#[derive(Debug)]
struct Slot {
    spec: CapabilitySpec,
    counters: Mutex<RateCounters>,
}

impl Slot {
    fn counters(&self) -> MutexGuard<'_, RateCounters> {
        self.counters.lock().unwrap_or_else(|poisoned| {
            warn!(capability = %self.spec.id, "rate counter lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RatePermit
// ────────────────────────────────────────────────────────────────────────────

/// Proof that a rate-limit slot was reserved. Dropping it frees the
/// concurrency slot; the cooldown keeps running from `admitted_at`.
#[derive(Debug)]
pub struct RatePermit {
    slot: Arc<Slot>,
    admitted_at: Instant,
    previous_admission: Option<Instant>,
}

impl RatePermit {
    pub fn admitted_at(&self) -> Instant {
        self.admitted_at
    }

    pub fn capability(&self) -> &str {
        &self.slot.spec.id
    }

    /// Give the reservation back because a later gate stage refused the
    /// request. The cooldown is rewound unless another admission has
    /// happened since.
    pub fn revoke(self) {
        let mut counters = self.slot.counters();
        if counters.last_admitted == Some(self.admitted_at) {
            counters.last_admitted = self.previous_admission;
        }
        // in_flight is released by Drop.
    }
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        let mut counters = self.slot.counters();
        counters.in_flight = counters.in_flight.saturating_sub(1);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CapabilityRegistry
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    slots: HashMap<String, Arc<Slot>>,
}

impl CapabilityRegistry {
    /// Register `specs`. Duplicate ids are a configuration error.
    pub fn new(specs: Vec<CapabilitySpec>) -> Result<Self, ArbiterError> {
        let mut slots = HashMap::with_capacity(specs.len());
        for spec in specs {
            if spec.max_concurrent == 0 {
                return Err(ArbiterError::Config(format!(
                    "capability '{}' has max_concurrent = 0",
                    spec.id
                )));
            }
            let id = spec.id.clone();
            let slot = Arc::new(Slot { spec, counters: Mutex::new(RateCounters::default()) });
            if slots.insert(id.clone(), slot).is_some() {
                return Err(ArbiterError::Config(format!("capability '{id}' registered twice")));
            }
        }
        Ok(Self { slots })
    }

    pub fn spec(&self, id: &str) -> Option<&CapabilitySpec> {
        self.slots.get(id).map(|s| &s.spec)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Atomically check cooldown and concurrency for `id` and reserve a slot.
    ///
    /// `Err` carries a human-readable reason; unknown ids are reported the
    /// same way so the gate can surface them as a rate-limit rejection.
    pub fn try_reserve(&self, id: &str) -> Result<RatePermit, String> {
        let slot = self
            .slots
            .get(id)
            .ok_or_else(|| format!("capability '{id}' is not registered"))?;
        let cooldown = Duration::from_millis(slot.spec.cooldown_ms);
        let now = Instant::now();

        let mut counters = slot.counters();
        if counters.in_flight >= slot.spec.max_concurrent {
            return Err(format!(
                "{} of {} concurrent executions already running",
                counters.in_flight, slot.spec.max_concurrent
            ));
        }
        if let Some(last) = counters.last_admitted {
            let since = now.saturating_duration_since(last);
            if since < cooldown {
                return Err(format!(
                    "cooling down: {} ms of {} ms elapsed",
                    since.as_millis(),
                    slot.spec.cooldown_ms
                ));
            }
        }
        let previous_admission = counters.last_admitted.replace(now);
        counters.in_flight += 1;
        drop(counters);

        Ok(RatePermit { slot: Arc::clone(slot), admitted_at: now, previous_admission })
    }

    /// Executions currently holding a permit for `id`.
    pub fn in_flight(&self, id: &str) -> u32 {
        self.slots.get(id).map_or(0, |s| s.counters().in_flight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_types::RiskLevel;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new(vec![
            CapabilitySpec::new("gather_wood", RiskLevel::Low).with_max_concurrent(2),
            CapabilitySpec::new("eat", RiskLevel::Low).with_cooldown_ms(10_000),
        ])
        .unwrap()
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = CapabilityRegistry::new(vec![
            CapabilitySpec::new("eat", RiskLevel::Low),
            CapabilitySpec::new("eat", RiskLevel::Low),
        ]);
        assert!(matches!(result, Err(ArbiterError::Config(_))));
    }

    #[test]
    fn concurrency_limit_is_enforced_and_released_on_drop() {
        let reg = registry();
        let a = reg.try_reserve("gather_wood").unwrap();
        let _b = reg.try_reserve("gather_wood").unwrap();
        assert!(reg.try_reserve("gather_wood").is_err());
        assert_eq!(reg.in_flight("gather_wood"), 2);
        drop(a);
        assert_eq!(reg.in_flight("gather_wood"), 1);
        assert!(reg.try_reserve("gather_wood").is_ok());
    }

    #[test]
    fn cooldown_blocks_until_elapsed() {
        let reg = registry();
        let permit = reg.try_reserve("eat").unwrap();
        drop(permit);
        let err = reg.try_reserve("eat").unwrap_err();
        assert!(err.contains("cooling down"));
    }

    #[test]
    fn revoked_permit_rewinds_cooldown() {
        let reg = registry();
        let permit = reg.try_reserve("eat").unwrap();
        permit.revoke();
        assert_eq!(reg.in_flight("eat"), 0);
        assert!(reg.try_reserve("eat").is_ok());
    }

    #[test]
    fn unknown_capability_cannot_be_reserved() {
        assert!(registry().try_reserve("teleport").is_err());
    }

    #[test]
    fn counters_are_independent_per_capability() {
        let reg = registry();
        let _eat = reg.try_reserve("eat").unwrap();
        assert!(reg.try_reserve("gather_wood").is_ok());
        assert_eq!(reg.ids(), vec!["eat".to_string(), "gather_wood".to_string()]);
    }
}
