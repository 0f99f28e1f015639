//! World/agent state as a flat fact table, plus the conditions and effects
//! that capabilities declare against it.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Comparison operator used by a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Present,
    Absent,
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A predicate over a single fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Condition {
    pub fact: String,
    pub cmp: Comparison,
    #[serde(default)]
    pub value: f64,
}

impl Condition {
    pub fn gte(fact: impl Into<String>, value: f64) -> Self {
        Self { fact: fact.into(), cmp: Comparison::Gte, value }
    }

    pub fn lte(fact: impl Into<String>, value: f64) -> Self {
        Self { fact: fact.into(), cmp: Comparison::Lte, value }
    }

    pub fn present(fact: impl Into<String>) -> Self {
        Self { fact: fact.into(), cmp: Comparison::Present, value: 0.0 }
    }

    pub fn absent(fact: impl Into<String>) -> Self {
        Self { fact: fact.into(), cmp: Comparison::Absent, value: 0.0 }
    }
}

/// A single change to the fact table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Effect {
    Set { fact: String, value: f64 },
    Add { fact: String, delta: f64 },
    Clear { fact: String },
}

impl Effect {
    pub fn fact(&self) -> &str {
        match self {
            Effect::Set { fact, .. } | Effect::Add { fact, .. } | Effect::Clear { fact } => fact,
        }
    }
}

/// Flat fact table describing the world and the agent.
///
/// Values are plain `f64`; booleans are encoded as `0.0` / `1.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    facts: BTreeMap<String, f64>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, fact: impl Into<String>, value: f64) -> Self {
        self.facts.insert(fact.into(), value);
        self
    }

    pub fn get(&self, fact: &str) -> Option<f64> {
        self.facts.get(fact).copied()
    }

    /// Value of `fact`, or `0.0` when absent.
    pub fn value(&self, fact: &str) -> f64 {
        self.get(fact).unwrap_or(0.0)
    }

    pub fn set(&mut self, fact: impl Into<String>, value: f64) {
        self.facts.insert(fact.into(), value);
    }

    pub fn facts(&self) -> &BTreeMap<String, f64> {
        &self.facts
    }

    pub fn satisfies(&self, condition: &Condition) -> bool {
        let current = self.get(&condition.fact);
        match condition.cmp {
            Comparison::Present => current.is_some(),
            Comparison::Absent => current.is_none(),
            Comparison::Eq => current.is_some_and(|v| (v - condition.value).abs() < f64::EPSILON),
            Comparison::Gt => current.unwrap_or(0.0) > condition.value,
            Comparison::Gte => current.unwrap_or(0.0) >= condition.value,
            Comparison::Lt => current.unwrap_or(0.0) < condition.value,
            Comparison::Lte => current.unwrap_or(0.0) <= condition.value,
        }
    }

    /// First condition in `conditions` that does not hold.
    pub fn first_unmet<'a>(&self, conditions: &'a [Condition]) -> Option<&'a Condition> {
        conditions.iter().find(|c| !self.satisfies(c))
    }

    /// Apply `effect` and return the effect that undoes it.
    pub fn apply(&mut self, effect: &Effect) -> Effect {
        let fact = effect.fact().to_string();
        let previous = self.get(&fact);
        match effect {
            Effect::Set { value, .. } => {
                self.facts.insert(fact.clone(), *value);
            }
            Effect::Add { delta, .. } => {
                *self.facts.entry(fact.clone()).or_insert(0.0) += delta;
            }
            Effect::Clear { .. } => {
                self.facts.remove(&fact);
            }
        }
        match previous {
            Some(value) => Effect::Set { fact, value },
            None => Effect::Clear { fact },
        }
    }

    /// Apply `effects` in order, returning the inverse list in the order it
    /// must be applied to undo them.
    pub fn apply_all(&mut self, effects: &[Effect]) -> Vec<Effect> {
        let mut inverse: Vec<Effect> = effects.iter().map(|e| self.apply(e)).collect();
        inverse.reverse();
        inverse
    }
}
