//! Signals and the needs derived from them.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Where a raw signal originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Internal bodily state (health, hunger, fatigue).
    Body,
    /// The surrounding environment (light level, weather, terrain).
    Env,
    /// Other agents (proximity of friends, chat activity).
    Social,
    /// Hostile or unexpected intrusions (threat proximity, damage taken).
    Intrusion,
    /// Recalled facts (known resource locations, unfinished work).
    Memory,
}

/// Direction of change relative to the previous value of the same signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    Falling,
    Steady,
}

impl Trend {
    /// Changes smaller than this are reported as [`Trend::Steady`].
    pub const EPSILON: f64 = 1e-3;

    /// Classify a value delta.
    pub fn from_delta(delta: f64) -> Self {
        if delta > Self::EPSILON {
            Trend::Rising
        } else if delta < -Self::EPSILON {
            Trend::Falling
        } else {
            Trend::Steady
        }
    }
}

/// An un-normalised measurement as produced by a sensor adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    pub name: String,
    pub value: f64,
    /// Lower bound of the source's native range.
    pub min: f64,
    /// Upper bound of the source's native range.
    pub max: f64,
    pub confidence: f64,
    pub ttl_ms: Option<u64>,
    pub provenance: Provenance,
    pub observed_at: DateTime<Utc>,
}

impl RawSignal {
    /// A signal already expressed in `[0, 1]` with full confidence and no TTL.
    pub fn new(name: impl Into<String>, value: f64, provenance: Provenance) -> Self {
        Self {
            name: name.into(),
            value,
            min: 0.0,
            max: 1.0,
            confidence: 1.0,
            ttl_ms: None,
            provenance,
            observed_at: Utc::now(),
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

/// A normalised, immutable signal record.
///
/// Newer signals with the same `name` supersede older ones; a `Signal` is
/// never mutated after it is emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    /// Normalised value in `[0, 1]`.
    pub value: f64,
    pub trend: Trend,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub ttl_ms: Option<u64>,
    pub provenance: Provenance,
    pub emitted_at: DateTime<Utc>,
}

impl Signal {
    /// `true` once `now` is past `emitted_at + ttl`. Signals without a TTL
    /// never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_ms {
            Some(ttl) => now - self.emitted_at > Duration::milliseconds(ttl as i64),
            None => false,
        }
    }

    /// Value weighted by confidence; what the need aggregator consumes.
    pub fn effective_value(&self) -> f64 {
        self.value * self.confidence
    }
}

/// The latent drives the arbiter balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeedKind {
    Safety,
    Nutrition,
    Progress,
    Social,
    Curiosity,
    Integrity,
}

impl NeedKind {
    pub const ALL: [NeedKind; 6] = [
        NeedKind::Safety,
        NeedKind::Nutrition,
        NeedKind::Progress,
        NeedKind::Social,
        NeedKind::Curiosity,
        NeedKind::Integrity,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            NeedKind::Safety => "safety",
            NeedKind::Nutrition => "nutrition",
            NeedKind::Progress => "progress",
            NeedKind::Social => "social",
            NeedKind::Curiosity => "curiosity",
            NeedKind::Integrity => "integrity",
        }
    }
}

impl fmt::Display for NeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-tick need score. Recomputed every tick and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeedScore {
    pub need: NeedKind,
    /// Score in `[0, 1]`.
    pub score: f64,
    /// `score(t) - score(t-1)`; used only for tie-breaking.
    pub d_score: f64,
}
