//! Need aggregation: signals → weighted drives.
//!
//! ```text
//! raw(n)   = clamp₀₁( Σ weight(s, n) · value(s) · confidence(s) )
//! gate(n)  = Π multiplier(g)   for every context gate g on n whose signal ≥ threshold
//! score(n) = clamp₀₁( raw(n) · gate(n) )
//! dScore   = score(t) − score(t−1)
//! ```
//!
//! [`NeedAggregator::aggregate`] is a pure function of the snapshot and the
//! previous tick's table; it never touches shared state.

use std::collections::BTreeMap;

use arbiter_types::config::NeedConfig;
use arbiter_types::{NeedKind, NeedScore};

use crate::signals::SignalSnapshot;

/// Need scores for one tick, one entry per [`NeedKind`].
#[derive(Debug, Clone, PartialEq)]
pub struct NeedTable {
    scores: BTreeMap<NeedKind, NeedScore>,
}

impl Default for NeedTable {
    fn default() -> Self {
        Self {
            scores: NeedKind::ALL
                .iter()
                .map(|&need| (need, NeedScore { need, score: 0.0, d_score: 0.0 }))
                .collect(),
        }
    }
}

impl NeedTable {
    /// Table with the given scores; needs not listed score 0.
    pub fn from_scores(scores: impl IntoIterator<Item = NeedScore>) -> Self {
        let mut table = Self::default();
        for score in scores {
            table.scores.insert(score.need, score);
        }
        table
    }

    pub fn get(&self, need: NeedKind) -> NeedScore {
        self.scores
            .get(&need)
            .copied()
            .unwrap_or(NeedScore { need, score: 0.0, d_score: 0.0 })
    }

    pub fn score(&self, need: NeedKind) -> f64 {
        self.get(need).score
    }

    pub fn iter(&self) -> impl Iterator<Item = &NeedScore> {
        self.scores.values()
    }

    /// Needs at or above `threshold`, strongest first. Ties keep
    /// [`NeedKind`] order.
    pub fn active(&self, threshold: f64) -> Vec<NeedScore> {
        let mut active: Vec<NeedScore> =
            self.scores.values().filter(|s| s.score >= threshold).copied().collect();
        active.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.need.cmp(&b.need)));
        active
    }
}

/// Context-gated linear combination of signals into need scores.
#[derive(Debug, Clone)]
pub struct NeedAggregator {
    config: NeedConfig,
}

impl NeedAggregator {
    pub fn new(config: NeedConfig) -> Self {
        Self { config }
    }

    /// Combined context-gate multiplier currently applying to `need`.
    pub fn context_gate(&self, need: NeedKind, snapshot: &SignalSnapshot) -> f64 {
        self.config
            .context_gates
            .iter()
            .filter(|g| g.need == need)
            .filter(|g| snapshot.get(&g.context_signal).is_some_and(|s| s.value >= g.threshold))
            .map(|g| g.multiplier)
            .product()
    }

    pub fn aggregate(&self, snapshot: &SignalSnapshot, previous: &NeedTable) -> NeedTable {
        let mut raw: BTreeMap<NeedKind, f64> = NeedKind::ALL.iter().map(|&n| (n, 0.0)).collect();
        for mapping in &self.config.mappings {
            if let Some(signal) = snapshot.get(&mapping.signal) {
                *raw.entry(mapping.need).or_insert(0.0) += mapping.weight * signal.effective_value();
            }
        }

        let scores = raw
            .into_iter()
            .map(|(need, sum)| {
                let gated = clamp_unit(sum) * self.context_gate(need, snapshot);
                let score = clamp_unit(gated);
                let d_score = score - previous.score(need);
                (need, NeedScore { need, score, d_score })
            })
            .collect();

        NeedTable { scores }
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
