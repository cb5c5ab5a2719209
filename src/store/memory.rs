//! In-memory storage backends.
//!
//! Thread-safe reference implementations of the storage traits, intended for
//! embedded usage and tests. All state sits behind a single `RwLock` per
//! store; `commit_checked` holds the write lock across its check and insert,
//! which is what makes check-then-commit serializable per neighborhood.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::conflict::Conflict;
use crate::grant::{Grant, GrantId, GrantStatus, ParticipantId};
use crate::store::traits::{
    AllocationStore, AuditStore, CommitOutcome, DenialRecord, OutcomeRecord, StorageError,
};
use crate::time::TimeWindow;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct AllocationState {
    by_id: HashMap<GrantId, Grant>,
}

impl AllocationState {
    fn approved_overlapping(&self, window: &TimeWindow) -> Vec<Grant> {
        self.by_id
            .values()
            .filter(|g| g.status == GrantStatus::Approved && g.window.overlaps(window))
            .cloned()
            .collect()
    }
}

/// Thread-safe in-memory allocation store.
#[derive(Debug, Default)]
pub struct InMemoryAllocationStore {
    state: RwLock<AllocationState>,
}

impl InMemoryAllocationStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AllocationStore for InMemoryAllocationStore {
    fn add(&self, grant: Grant) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("alloc.add"))?;
        if state.by_id.contains_key(&grant.id) {
            return Err(StorageError::DuplicateKey(grant.id.to_string()));
        }
        state.by_id.insert(grant.id, grant);
        Ok(())
    }

    fn get(&self, id: GrantId) -> Result<Option<Grant>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("alloc.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn get_active(&self, at: DateTime<Utc>) -> Result<Vec<Grant>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("alloc.get_active"))?;
        Ok(state
            .by_id
            .values()
            .filter(|g| g.status == GrantStatus::Approved && g.window.contains(at))
            .cloned()
            .collect())
    }

    fn get_by_frequency_range(
        &self,
        min_mhz: f64,
        max_mhz: f64,
        at: DateTime<Utc>,
    ) -> Result<Vec<Grant>, StorageError> {
        let active = self.get_active(at)?;
        Ok(active
            .into_iter()
            .filter(|g| {
                let (low, high) = g.frequency_range_mhz();
                low <= max_mhz && high >= min_mhz
            })
            .collect())
    }

    fn get_overlapping(&self, window: &TimeWindow) -> Result<Vec<Grant>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("alloc.get_overlapping"))?;
        Ok(state.approved_overlapping(window))
    }

    fn get_by_participant(&self, owner: &ParticipantId) -> Result<Vec<Grant>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("alloc.get_by_participant"))?;
        Ok(state
            .by_id
            .values()
            .filter(|g| &g.owner == owner)
            .cloned()
            .collect())
    }

    fn commit_checked(
        &self,
        mut grant: Grant,
        check: &dyn Fn(&Grant, &[Grant]) -> Vec<Conflict>,
    ) -> Result<CommitOutcome, StorageError> {
        // The write lock spans both the check and the insert. A racing
        // commit on an overlapping neighborhood therefore sees this grant in
        // its refreshed active set, or not at all.
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("alloc.commit_checked"))?;

        if state.by_id.contains_key(&grant.id) {
            return Err(StorageError::DuplicateKey(grant.id.to_string()));
        }

        let neighborhood = state.approved_overlapping(&grant.window);
        let conflicts = check(&grant, &neighborhood);
        if !conflicts.is_empty() {
            return Ok(CommitOutcome::Contested(conflicts));
        }

        grant.status = GrantStatus::Approved;
        state.by_id.insert(grant.id, grant);
        Ok(CommitOutcome::Committed)
    }

    fn remove(&self, id: GrantId) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("alloc.remove"))?;
        Ok(state.by_id.remove(&id).is_some())
    }

    fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("alloc.remove_expired"))?;
        let mut pruned = 0;
        for grant in state.by_id.values_mut() {
            if grant.status == GrantStatus::Approved && grant.window.has_elapsed(now) {
                grant.status = GrantStatus::Expired;
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

#[derive(Debug, Default)]
struct AuditState {
    conflicts: Vec<Conflict>,
    denials: Vec<DenialRecord>,
    outcomes: Vec<OutcomeRecord>,
}

/// Thread-safe in-memory audit store.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    state: RwLock<AuditState>,
}

impl InMemoryAuditStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditStore for InMemoryAuditStore {
    fn record_conflicts(&self, conflicts: &[Conflict]) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("audit.record_conflicts"))?;
        state.conflicts.extend_from_slice(conflicts);
        Ok(())
    }

    fn record_denial(&self, denial: DenialRecord) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("audit.record_denial"))?;
        state.denials.push(denial);
        Ok(())
    }

    fn record_outcome(&self, outcome: OutcomeRecord) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("audit.record_outcome"))?;
        state.outcomes.push(outcome);
        Ok(())
    }

    fn conflict_history(&self) -> Result<Vec<Conflict>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("audit.conflict_history"))?;
        Ok(state.conflicts.clone())
    }

    fn denials(&self) -> Result<Vec<DenialRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("audit.denials"))?;
        Ok(state.denials.clone())
    }

    fn negotiation_outcomes(&self) -> Result<Vec<OutcomeRecord>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("audit.negotiation_outcomes"))?;
        Ok(state.outcomes.clone())
    }
}
