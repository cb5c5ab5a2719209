//! Storage layer: allocation store and audit trail.

mod memory;
mod traits;

pub use memory::{InMemoryAllocationStore, InMemoryAuditStore};
pub use traits::{
    AllocationStore, AuditStore, CommitOutcome, DenialRecord, OutcomeRecord, StorageError,
};
