//! [`RollbackJournal`] – inverse-effect journal for reversible executions.
//!
//! Every successful execution of a `reversible` capability records the
//! inverse of the effects it applied under a fresh [`RollbackToken`]. A
//! rollback claims the entry exactly once; every later attempt on the same
//! token is a no-op, so the end state after N rollbacks equals the end state
//! after one.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use arbiter_types::{Effect, RollbackToken};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
enum EntryState {
    Armed,
    InProgress,
    RolledBack,
}

#[derive(Debug)]
struct JournalEntry {
    capability: String,
    inverse: Vec<Effect>,
    state: EntryState,
}

/// Result of trying to claim a journal entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The caller now owns the rollback and must apply `inverse`.
    Apply { capability: String, inverse: Vec<Effect> },
    /// Already rolled back or being rolled back.
    AlreadyClaimed,
    Unknown,
}

#[derive(Debug, Default)]
pub struct RollbackJournal {
    entries: Mutex<HashMap<RollbackToken, JournalEntry>>,
}

impl RollbackJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RollbackToken, JournalEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("rollback journal lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Journal `inverse` for `capability` and hand out the token.
    pub fn record(&self, capability: impl Into<String>, inverse: Vec<Effect>) -> RollbackToken {
        let token = RollbackToken(Uuid::new_v4());
        self.entries().insert(
            token,
            JournalEntry { capability: capability.into(), inverse, state: EntryState::Armed },
        );
        token
    }

    /// Claim `token` for rollback.
    pub fn claim(&self, token: RollbackToken) -> Claim {
        let mut entries = self.entries();
        match entries.get_mut(&token) {
            None => Claim::Unknown,
            Some(entry) if entry.state != EntryState::Armed => Claim::AlreadyClaimed,
            Some(entry) => {
                entry.state = EntryState::InProgress;
                Claim::Apply { capability: entry.capability.clone(), inverse: entry.inverse.clone() }
            }
        }
    }

    /// Mark a claimed rollback finished.
    pub fn complete(&self, token: RollbackToken) {
        if let Some(entry) = self.entries().get_mut(&token) {
            entry.state = EntryState::RolledBack;
        }
    }

    /// Re-arm a claimed token whose compensation failed, so it can be retried.
    pub fn release(&self, token: RollbackToken) {
        if let Some(entry) = self.entries().get_mut(&token)
            && entry.state == EntryState::InProgress
        {
            entry.state = EntryState::Armed;
        }
    }

    pub fn is_rolled_back(&self, token: RollbackToken) -> bool {
        self.entries().get(&token).is_some_and(|e| e.state == EntryState::RolledBack)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
