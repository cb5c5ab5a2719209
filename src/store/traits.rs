//! Abstract storage traits for the allocation and audit stores.
//!
//! The allocation store is the single source of truth for committed grants
//! and the only shared mutable resource in the core. All writes go through
//! `add`, `commit_checked`, explicit removal, or expiry. The audit store is
//! append-only: expiry and cancellation never touch it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conflict::Conflict;
use crate::grant::{Grant, GrantId, ParticipantId};
use crate::negotiation::{SessionId, SessionState};
use crate::time::TimeWindow;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Grant not found.
    #[error("Grant not found: {0}")]
    GrantNotFound(GrantId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Result of an atomic check-then-commit attempt.
#[derive(Debug)]
pub enum CommitOutcome {
    /// The grant passed the check against the refreshed active set and is
    /// now visible to every subsequent conflict check.
    Committed,

    /// The refreshed active set produced blocking conflicts; nothing was
    /// written. The caller re-evaluates or escalates, never drops silently.
    Contested(Vec<Conflict>),
}

/// Storage trait for committed spectrum grants.
///
/// # Ordering contract
/// `commit_checked` runs its conflict check and the insert inside one
/// critical section scoped to the store, so commits touching overlapping
/// neighborhoods are serializable: two mutually conflicting proposals are
/// never both committed.
pub trait AllocationStore: Send + Sync {
    /// Insert a grant unconditionally. Returns an error if the ID exists.
    fn add(&self, grant: Grant) -> Result<(), StorageError>;

    /// Get a grant by ID (any status).
    fn get(&self, id: GrantId) -> Result<Option<Grant>, StorageError>;

    /// All approved grants whose window contains `at`.
    fn get_active(&self, at: DateTime<Utc>) -> Result<Vec<Grant>, StorageError>;

    /// Approved grants active at `at` whose occupied frequency range
    /// intersects `[min_mhz, max_mhz]`.
    fn get_by_frequency_range(
        &self,
        min_mhz: f64,
        max_mhz: f64,
        at: DateTime<Utc>,
    ) -> Result<Vec<Grant>, StorageError>;

    /// Approved grants whose window overlaps `window` — the temporal
    /// neighborhood a proposal must be checked against.
    fn get_overlapping(&self, window: &TimeWindow) -> Result<Vec<Grant>, StorageError>;

    /// All grants owned by a participant (any status).
    fn get_by_participant(&self, owner: &ParticipantId) -> Result<Vec<Grant>, StorageError>;

    /// Atomically re-run `check` against the approved set overlapping the
    /// grant's window and commit only if `check` returns no conflicts.
    fn commit_checked(
        &self,
        grant: Grant,
        check: &dyn Fn(&Grant, &[Grant]) -> Vec<Conflict>,
    ) -> Result<CommitOutcome, StorageError>;

    /// Remove a grant by ID (owner cancellation). Returns whether it existed.
    fn remove(&self, id: GrantId) -> Result<bool, StorageError>;

    /// Mark every approved grant whose window has elapsed as expired,
    /// removing it from the active query set. Returns the number pruned.
    fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError>;
}

/// An audited DENY decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialRecord {
    /// The denied grant.
    pub grant_id: GrantId,

    /// Its owner.
    pub owner: ParticipantId,

    /// Why it was denied.
    pub reasons: Vec<String>,

    /// When the decision was made.
    pub denied_at: DateTime<Utc>,
}

/// The audited outcome of a negotiation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// The session.
    pub session_id: SessionId,

    /// Terminal (or escalated) state reached.
    pub state: SessionState,

    /// Human-readable summary of the resolution.
    pub summary: String,

    /// When the outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Append-only audit trail consumed by read-only dashboards.
pub trait AuditStore: Send + Sync {
    /// Record detected conflicts.
    fn record_conflicts(&self, conflicts: &[Conflict]) -> Result<(), StorageError>;

    /// Record a denial.
    fn record_denial(&self, denial: DenialRecord) -> Result<(), StorageError>;

    /// Record a negotiation outcome.
    fn record_outcome(&self, outcome: OutcomeRecord) -> Result<(), StorageError>;

    /// Every conflict ever recorded, in detection order.
    fn conflict_history(&self) -> Result<Vec<Conflict>, StorageError>;

    /// Every denial, in decision order.
    fn denials(&self) -> Result<Vec<DenialRecord>, StorageError>;

    /// Every negotiation outcome, in recording order.
    fn negotiation_outcomes(&self) -> Result<Vec<OutcomeRecord>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_allocation_store_object_safe(_: &dyn AllocationStore) {}
    fn _assert_audit_store_object_safe(_: &dyn AuditStore) {}

    #[test]
    fn storage_error_display() {
        let err = StorageError::GrantNotFound(GrantId::new());
        assert!(err.to_string().contains("Grant not found"));

        let err = StorageError::BackendError("poisoned lock".to_string());
        assert!(err.to_string().contains("poisoned lock"));
    }
}
