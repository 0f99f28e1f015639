//! Signal normalisation, supersession and same-tick fusion.
//!
//! Sensor adapters speak different units: a hostile-proximity sensor reports
//! metres, a hunger meter reports 0..20, a light sensor reports lux. The
//! [`SignalNormalizer`] maps every [`RawSignal`] onto the uniform [`Signal`]
//! record (`value ∈ [0, 1]`, `confidence ∈ [0, 1]`) and keeps the newest
//! signal per name so that every tick sees one coherent [`SignalSnapshot`].
//!
//! # Fusion rule
//!
//! When two providers report the same signal name in the same batch, the
//! emitted value is the confidence-weighted mean:
//!
//! ```text
//! value      = Σ(cᵢ · vᵢ) / Σ cᵢ
//! confidence = max cᵢ
//! provenance = provenance of the most confident report
//! ```
//!
//! Reports from the *same* provenance are not fused: the newest supersedes
//! the older one.
//!
//! # Example
//!
//! ```rust
//! use arbiter_perception::signals::SignalNormalizer;
//! use arbiter_types::{Provenance, RawSignal};
//! use chrono::Utc;
//!
//! let mut normalizer = SignalNormalizer::new();
//! let now = Utc::now();
//! let snapshot = normalizer.ingest(
//!     vec![RawSignal::new("hunger", 15.0, Provenance::Body).with_range(0.0, 20.0).observed_at(now)],
//!     now,
//! );
//! assert!((snapshot.value("hunger") - 0.75).abs() < 1e-9);
//! ```

use std::collections::BTreeMap;

use arbiter_types::{Provenance, RawSignal, Signal, Trend};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

// ─────────────────────────────────────────────────────────────────────────────
// SignalSnapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable view of the live signals at the start of a tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalSnapshot {
    signals: BTreeMap<String, Signal>,
}

impl SignalSnapshot {
    pub fn from_signals(signals: impl IntoIterator<Item = Signal>) -> Self {
        Self {
            signals: signals.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Signal> {
        self.signals.get(name)
    }

    /// Normalised value of `name`, or `0.0` when the signal is absent.
    pub fn value(&self, name: &str) -> f64 {
        self.signals.get(name).map_or(0.0, |s| s.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.signals.values()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SignalNormalizer
// ─────────────────────────────────────────────────────────────────────────────

/// Stateful normaliser: remembers the newest [`Signal`] per name so trends
/// can be computed and stale reports can be discarded.
#[derive(Debug, Default)]
pub struct SignalNormalizer {
    latest: BTreeMap<String, Signal>,
}

impl SignalNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map one raw measurement onto the uniform record.
    ///
    /// Returns `None` for non-finite values. A degenerate range
    /// (`max <= min`) is treated as already normalised.
    pub fn normalize(raw: &RawSignal, previous: Option<&Signal>) -> Option<Signal> {
        if !raw.value.is_finite() {
            warn!(signal = %raw.name, value = raw.value, "dropping non-finite signal");
            return None;
        }
        let span = raw.max - raw.min;
        let value = if span > 0.0 && span.is_finite() {
            (raw.value - raw.min) / span
        } else {
            raw.value
        };
        let value = value.clamp(0.0, 1.0);
        let confidence = if raw.confidence.is_finite() {
            raw.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let trend = previous.map_or(Trend::Steady, |p| Trend::from_delta(value - p.value));

        Some(Signal {
            name: raw.name.clone(),
            value,
            trend,
            confidence,
            ttl_ms: raw.ttl_ms,
            provenance: raw.provenance,
            emitted_at: raw.observed_at,
        })
    }

    /// Fold a batch of raw signals into the store and return the live
    /// snapshot as of `now`.
    ///
    /// Reports older than the stored signal of the same name are ignored.
    /// Expired signals are evicted before the snapshot is taken.
    pub fn ingest(&mut self, batch: Vec<RawSignal>, now: DateTime<Utc>) -> SignalSnapshot {
        // name → provenance → newest report from that provenance
        let mut grouped: BTreeMap<String, BTreeMap<Provenance, RawSignal>> = BTreeMap::new();
        for raw in batch {
            if let Some(existing) = self.latest.get(&raw.name)
                && raw.observed_at < existing.emitted_at
            {
                debug!(signal = %raw.name, "ignoring out-of-order report");
                continue;
            }
            let slot = grouped.entry(raw.name.clone()).or_default();
            match slot.get(&raw.provenance) {
                Some(held) if held.observed_at > raw.observed_at => {}
                _ => {
                    slot.insert(raw.provenance, raw);
                }
            }
        }

        for (name, reports) in grouped {
            let previous = self.latest.get(&name);
            let normalized: Vec<Signal> = reports
                .values()
                .filter_map(|raw| Self::normalize(raw, previous))
                .collect();
            if let Some(fused) = fuse(normalized, previous) {
                self.latest.insert(name, fused);
            }
        }

        let before = self.latest.len();
        self.latest.retain(|_, s| !s.is_expired(now));
        let evicted = before - self.latest.len();
        if evicted > 0 {
            debug!(evicted, "expired signals evicted");
        }

        SignalSnapshot {
            signals: self.latest.clone(),
        }
    }

    /// Current stored signal for `name`, if any.
    pub fn latest(&self, name: &str) -> Option<&Signal> {
        self.latest.get(name)
    }
}

/// Confidence-weighted fusion of same-name reports from distinct providers.
fn fuse(reports: Vec<Signal>, previous: Option<&Signal>) -> Option<Signal> {
    let mut iter = reports.into_iter();
    let first = iter.next()?;
    let rest: Vec<Signal> = iter.collect();
    if rest.is_empty() {
        return Some(first);
    }

    let all: Vec<&Signal> = std::iter::once(&first).chain(rest.iter()).collect();
    let total_conf: f64 = all.iter().map(|s| s.confidence).sum();
    let value = if total_conf > 0.0 {
        all.iter().map(|s| s.confidence * s.value).sum::<f64>() / total_conf
    } else {
        all.iter().map(|s| s.value).sum::<f64>() / all.len() as f64
    };
    // Ties on confidence resolve to the first provenance in enum order.
    let lead = all
        .iter()
        .copied()
        .reduce(|best, s| if s.confidence > best.confidence { s } else { best })?;
    let emitted_at = all.iter().map(|s| s.emitted_at).max()?;
    let ttl_ms = all.iter().filter_map(|s| s.ttl_ms).min();
    let value = value.clamp(0.0, 1.0);

    Some(Signal {
        name: lead.name.clone(),
        value,
        trend: previous.map_or(Trend::Steady, |p| Trend::from_delta(value - p.value)),
        confidence: lead.confidence,
        ttl_ms,
        provenance: lead.provenance,
        emitted_at,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn normalize_maps_native_range() {
        let raw = RawSignal::new("hostile_proximity", 12.0, Provenance::Intrusion).with_range(0.0, 16.0);
        let s = SignalNormalizer::normalize(&raw, None).unwrap();
        assert!(approx(s.value, 0.75));
        assert_eq!(s.trend, Trend::Steady);
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let raw = RawSignal::new("hunger", 40.0, Provenance::Body).with_range(0.0, 20.0);
        assert!(approx(SignalNormalizer::normalize(&raw, None).unwrap().value, 1.0));
        let raw = RawSignal::new("hunger", -5.0, Provenance::Body).with_range(0.0, 20.0);
        assert!(approx(SignalNormalizer::normalize(&raw, None).unwrap().value, 0.0));
    }

    #[test]
    fn normalize_handles_degenerate_range_and_bad_confidence() {
        let raw = RawSignal::new("x", 3.0, Provenance::Env)
            .with_range(5.0, 5.0)
            .with_confidence(f64::NAN);
        let s = SignalNormalizer::normalize(&raw, None).unwrap();
        assert!(approx(s.value, 1.0));
        assert!(approx(s.confidence, 0.0));
    }

    #[test]
    fn normalize_drops_nan() {
        let raw = RawSignal::new("x", f64::NAN, Provenance::Env);
        assert!(SignalNormalizer::normalize(&raw, None).is_none());
    }

    #[test]
    fn trend_follows_previous_value() {
        let mut n = SignalNormalizer::new();
        let t0 = Utc::now();
        n.ingest(vec![RawSignal::new("hunger", 0.2, Provenance::Body).observed_at(t0)], t0);
        let t1 = t0 + Duration::milliseconds(250);
        let snap = n.ingest(vec![RawSignal::new("hunger", 0.5, Provenance::Body).observed_at(t1)], t1);
        assert_eq!(snap.get("hunger").unwrap().trend, Trend::Rising);
        let t2 = t1 + Duration::milliseconds(250);
        let snap = n.ingest(vec![RawSignal::new("hunger", 0.1, Provenance::Body).observed_at(t2)], t2);
        assert_eq!(snap.get("hunger").unwrap().trend, Trend::Falling);
    }

    #[test]
    fn newer_report_from_same_provenance_supersedes() {
        let mut n = SignalNormalizer::new();
        let t0 = Utc::now();
        let snap = n.ingest(
            vec![
                RawSignal::new("night", 0.9, Provenance::Env).observed_at(t0 + Duration::milliseconds(5)),
                RawSignal::new("night", 0.1, Provenance::Env).observed_at(t0),
            ],
            t0 + Duration::milliseconds(10),
        );
        assert!(approx(snap.value("night"), 0.9));
    }

    #[test]
    fn out_of_order_report_is_ignored() {
        let mut n = SignalNormalizer::new();
        let t0 = Utc::now();
        n.ingest(vec![RawSignal::new("night", 0.8, Provenance::Env).observed_at(t0)], t0);
        let snap = n.ingest(
            vec![RawSignal::new("night", 0.1, Provenance::Env).observed_at(t0 - Duration::seconds(1))],
            t0,
        );
        assert!(approx(snap.value("night"), 0.8));
    }

    #[test]
    fn cross_provenance_reports_are_fused_by_confidence() {
        let mut n = SignalNormalizer::new();
        let now = Utc::now();
        let snap = n.ingest(
            vec![
                RawSignal::new("hostile_proximity", 1.0, Provenance::Intrusion)
                    .with_confidence(0.9)
                    .observed_at(now),
                RawSignal::new("hostile_proximity", 0.0, Provenance::Social)
                    .with_confidence(0.1)
                    .observed_at(now),
            ],
            now,
        );
        let s = snap.get("hostile_proximity").unwrap();
        assert!(approx(s.value, 0.9));
        assert!(approx(s.confidence, 0.9));
        assert_eq!(s.provenance, Provenance::Intrusion);
    }

    #[test]
    fn expired_signals_are_evicted() {
        let mut n = SignalNormalizer::new();
        let t0 = Utc::now();
        n.ingest(
            vec![
                RawSignal::new("damage_taken", 1.0, Provenance::Intrusion)
                    .with_ttl_ms(100)
                    .observed_at(t0),
                RawSignal::new("night", 1.0, Provenance::Env).observed_at(t0),
            ],
            t0,
        );
        let snap = n.ingest(Vec::new(), t0 + Duration::milliseconds(500));
        assert!(snap.get("damage_taken").is_none());
        assert!(snap.get("night").is_some());
        assert!(n.latest("damage_taken").is_none());
    }

    #[test]
    fn snapshot_value_defaults_to_zero() {
        let snap = SignalSnapshot::default();
        assert!(snap.is_empty());
        assert!(approx(snap.value("missing"), 0.0));
    }
}
