//! Priority ranker.
//!
//! ```text
//! priority(g) = base(g) × gate(g) × (1 − risk(g)) + commitment(g) + novelty(g) − opportunity(g)
//! ```
//!
//! | Term | Source |
//! |---|---|
//! | `base` | current need score; subgoals use the parent need × `subgoal_discount` |
//! | `gate` | the template's own context multipliers (need-level gates are already in the need score) |
//! | `risk` | template risk in `[0, 1]` |
//! | `commitment` | [`CommitmentTable`] entry for the goal key |
//! | `novelty` | template novelty boost |
//! | `opportunity` | feasibility cost × `opportunity_cost_weight` |
//!
//! Ordering is total and deterministic: priority descending, then the need's
//! `dScore` descending, then feasibility cost ascending, then tier, then goal
//! key. Identical inputs always yield identical output.

use std::cmp::Ordering;

use arbiter_perception::{NeedTable, SignalSnapshot};
use arbiter_types::config::RankingConfig;
use arbiter_types::{GoalCandidate, GoalOrigin};

use crate::context::CommitmentTable;
use crate::goals::GoalLibrary;

pub struct PriorityRanker {
    config: RankingConfig,
}

impl PriorityRanker {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    /// Compute the priority of one candidate. Always finite.
    pub fn score(
        &self,
        candidate: &GoalCandidate,
        library: &GoalLibrary,
        needs: &NeedTable,
        commitments: &CommitmentTable,
        snapshot: &SignalSnapshot,
    ) -> f64 {
        let mut base = needs.score(candidate.need);
        if candidate.origin == GoalOrigin::Subgoal {
            base *= self.config.subgoal_discount;
        }
        let (gate, risk, novelty) = library
            .get(&candidate.template_ref)
            .map(|t| (t.context_gate(snapshot), t.risk.clamp(0.0, 1.0), t.novelty))
            .unwrap_or((1.0, 0.0, 0.0));
        let opportunity = self.config.opportunity_cost_weight * feasibility_cost(candidate);

        let priority = base * gate * (1.0 - risk) + commitments.get(&candidate.key()) + novelty - opportunity;
        if priority.is_finite() { priority } else { 0.0 }
    }

    /// Score every candidate and sort them best first.
    pub fn rank(
        &self,
        mut candidates: Vec<GoalCandidate>,
        library: &GoalLibrary,
        needs: &NeedTable,
        commitments: &CommitmentTable,
        snapshot: &SignalSnapshot,
    ) -> Vec<GoalCandidate> {
        for candidate in &mut candidates {
            candidate.priority = self.score(candidate, library, needs, commitments, snapshot);
        }
        candidates.sort_by(|a, b| compare(a, b, needs));
        candidates
    }
}

fn feasibility_cost(candidate: &GoalCandidate) -> f64 {
    candidate
        .feasibility
        .as_ref()
        .map(|f| f.cost)
        .filter(|c| c.is_finite())
        .unwrap_or(0.0)
}

fn compare(a: &GoalCandidate, b: &GoalCandidate, needs: &NeedTable) -> Ordering {
    b.priority
        .total_cmp(&a.priority)
        .then_with(|| needs.get(b.need).d_score.total_cmp(&needs.get(a.need).d_score))
        .then_with(|| feasibility_cost(a).total_cmp(&feasibility_cost(b)))
        .then_with(|| a.tier.cmp(&b.tier))
        .then_with(|| a.key().cmp(&b.key()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_types::{Bindings, Feasibility, NeedKind, NeedScore, PriorityTier};

    fn candidate(template: &str, need: NeedKind, cost: f64) -> GoalCandidate {
        let mut c = GoalCandidate::new(template, need, PriorityTier::GoalCompletion, Bindings::new());
        c.feasibility = Some(Feasibility::ok(cost));
        c
    }

    fn table(entries: &[(NeedKind, f64, f64)]) -> NeedTable {
        NeedTable::from_scores(entries.iter().map(|&(need, score, d_score)| NeedScore { need, score, d_score }))
    }

    #[test]
    fn formula_combines_every_term() {
        let ranker = PriorityRanker::new(RankingConfig::default());
        let library = GoalLibrary::default();
        let needs = table(&[(NeedKind::Curiosity, 0.8, 0.0)]);
        let mut commitments = CommitmentTable::default();
        commitments.commit("explore", 0.15);

        let explore = candidate("explore", NeedKind::Curiosity, 2.0);
        let p = ranker.score(&explore, &library, &needs, &commitments, &SignalSnapshot::default());
        // 0.8 × 1 × 0.8 + 0.15 + 0.1 − 0.04
        assert!((p - 0.85).abs() < 1e-9, "got {p}");
    }

    #[test]
    fn ties_break_on_trend_then_cost() {
        let ranker = PriorityRanker::new(RankingConfig { opportunity_cost_weight: 0.0, ..Default::default() });
        let library = GoalLibrary::default();
        let needs = table(&[(NeedKind::Integrity, 0.5, 0.0), (NeedKind::Social, 0.5, 0.2)]);

        // Same priority; socialize carries novelty so strip it by using
        // templates unknown to the library.
        let a = candidate("mend", NeedKind::Integrity, 1.0);
        let b = candidate("chat", NeedKind::Social, 1.0);
        let ranked = ranker.rank(vec![a, b], &library, &needs, &CommitmentTable::default(), &SignalSnapshot::default());
        assert_eq!(ranked[0].template_ref, "chat", "rising need wins the tie");

        let cheap = candidate("mend_cheap", NeedKind::Integrity, 0.5);
        let dear = candidate("mend_dear", NeedKind::Integrity, 3.0);
        let ranked = ranker.rank(vec![dear, cheap], &library, &needs, &CommitmentTable::default(), &SignalSnapshot::default());
        assert_eq!(ranked[0].template_ref, "mend_cheap", "cheaper goal wins the tie");
    }

    #[test]
    fn subgoals_are_discounted() {
        let ranker = PriorityRanker::new(RankingConfig { opportunity_cost_weight: 0.0, ..Default::default() });
        let library = GoalLibrary::default();
        let needs = table(&[(NeedKind::Nutrition, 0.5, 0.0)]);
        let mut sub = candidate("gather", NeedKind::Nutrition, 1.0);
        sub.origin = GoalOrigin::Subgoal;
        let p = ranker.score(&sub, &library, &needs, &CommitmentTable::default(), &SignalSnapshot::default());
        assert!((p - 0.45).abs() < 1e-9);
    }

    #[test]
    fn ranking_is_deterministic_and_finite() {
        let ranker = PriorityRanker::new(RankingConfig::default());
        let library = GoalLibrary::default();
        let needs = table(&[
            (NeedKind::Safety, 0.4, 0.1),
            (NeedKind::Nutrition, 0.4, 0.1),
            (NeedKind::Curiosity, f64::NAN, 0.0),
        ]);
        let make = || {
            vec![
                candidate("hide", NeedKind::Safety, 1.0),
                candidate("eat", NeedKind::Nutrition, 1.0),
                candidate("explore", NeedKind::Curiosity, 2.0),
                candidate("idle", NeedKind::Progress, 0.0),
            ]
        };
        let first: Vec<String> = ranker
            .rank(make(), &library, &needs, &CommitmentTable::default(), &SignalSnapshot::default())
            .iter()
            .map(|c| c.key())
            .collect();
        for _ in 0..20 {
            let ranked = ranker.rank(make(), &library, &needs, &CommitmentTable::default(), &SignalSnapshot::default());
            assert!(ranked.iter().all(|c| c.priority.is_finite()));
            let keys: Vec<String> = ranked.iter().map(|c| c.key()).collect();
            assert_eq!(keys, first);
        }
    }
}
