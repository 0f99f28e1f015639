//! Versioned tick context.
//!
//! Every tick reads one immutable [`TickContext`] and produces the next one
//! with [`TickContext::advance`]; nothing is mutated in place. The commitment
//! table is the only ranking state that survives the boundary.

use std::collections::BTreeMap;

use arbiter_perception::NeedTable;
use arbiter_types::config::RankingConfig;
use arbiter_types::{DegradationLevel, WorldState};

/// Commitment boosts keyed by goal key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitmentTable {
    boosts: BTreeMap<String, f64>,
}

impl CommitmentTable {
    pub fn get(&self, goal_key: &str) -> f64 {
        self.boosts.get(goal_key).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.boosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boosts.is_empty()
    }

    /// Set (not add) the boost for a goal a plan was dispatched for.
    pub fn commit(&mut self, goal_key: impl Into<String>, boost: f64) {
        self.boosts.insert(goal_key.into(), boost);
    }

    pub fn revoke(&mut self, goal_key: &str) {
        self.boosts.remove(goal_key);
    }

    /// One tick of multiplicative decay; boosts under `epsilon` are dropped.
    pub fn decayed(&self, decay: f64, epsilon: f64) -> Self {
        Self {
            boosts: self
                .boosts
                .iter()
                .map(|(k, v)| (k.clone(), v * decay))
                .filter(|(_, v)| *v >= epsilon)
                .collect(),
        }
    }
}

/// Everything one tick needs from the previous one.
#[derive(Debug, Clone)]
pub struct TickContext {
    pub version: u64,
    pub world: WorldState,
    /// Previous tick's need table, for `dScore`.
    pub needs: NeedTable,
    pub commitments: CommitmentTable,
    pub degradation: DegradationLevel,
}

impl TickContext {
    pub fn initial(world: WorldState) -> Self {
        Self {
            version: 0,
            world,
            needs: NeedTable::default(),
            commitments: CommitmentTable::default(),
            degradation: DegradationLevel::Full,
        }
    }

    /// Context for the next tick. `commitments` is this tick's table after
    /// any new commitment; it decays here once.
    pub fn advance(
        &self,
        world: WorldState,
        needs: NeedTable,
        commitments: &CommitmentTable,
        degradation: DegradationLevel,
        ranking: &RankingConfig,
    ) -> Self {
        Self {
            version: self.version + 1,
            world,
            needs,
            commitments: commitments.decayed(ranking.commitment_decay, ranking.commitment_epsilon),
            degradation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_decays_and_drops_below_epsilon() {
        let mut table = CommitmentTable::default();
        table.commit("flee", 0.15);
        let ranking = RankingConfig::default();

        let mut ctx = TickContext::initial(WorldState::new());
        let mut boosts = Vec::new();
        let mut commitments = table;
        for _ in 0..10 {
            ctx = ctx.advance(ctx.world.clone(), NeedTable::default(), &commitments, ctx.degradation, &ranking);
            commitments = ctx.commitments.clone();
            boosts.push(commitments.get("flee"));
        }
        assert!((boosts[0] - 0.105).abs() < 1e-9);
        assert!(boosts.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(*boosts.last().unwrap(), 0.0);
        assert!(commitments.is_empty());
        assert_eq!(ctx.version, 10);
    }

    #[test]
    fn advancing_leaves_the_previous_context_untouched() {
        let ctx = TickContext::initial(WorldState::new().with("wood", 1.0));
        let next = ctx.advance(
            WorldState::new().with("wood", 2.0),
            NeedTable::default(),
            &CommitmentTable::default(),
            DegradationLevel::Basic,
            &RankingConfig::default(),
        );
        assert_eq!(ctx.world.value("wood"), 1.0);
        assert_eq!(ctx.version, 0);
        assert_eq!(next.world.value("wood"), 2.0);
        assert_eq!(next.degradation, DegradationLevel::Basic);
    }

    #[test]
    fn commit_overwrites_instead_of_accumulating() {
        let mut table = CommitmentTable::default();
        table.commit("eat", 0.15);
        table.commit("eat", 0.15);
        assert_eq!(table.get("eat"), 0.15);
        table.revoke("eat");
        assert_eq!(table.get("eat"), 0.0);
    }
}
