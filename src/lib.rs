//! specarb: spectrum admission and negotiation arbiter.
//!
//! Arbitrates requests for radio spectrum among cooperating participants.
//! A proposal passes a static policy gate (protected bands, protected
//! areas, power ceilings), is checked for contention against every
//! committed grant whose time window overlaps, and is then approved,
//! denied with alternative frequencies, or routed into a bounded
//! multi-round negotiation session. Sessions resolve by convergence or by
//! an automatic strategy ladder (priority override, time-sharing,
//! escalation); escalated sessions wait for a human override.
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use specarb::{
//!     ArbiterConfig, ArbiterEngine, Grant, InMemoryAllocationStore,
//!     InMemoryAuditStore, Location, SubmitOutcome, TimeWindow,
//! };
//!
//! let engine = ArbiterEngine::new(
//!     ArbiterConfig::default(),
//!     Arc::new(InMemoryAllocationStore::new()),
//!     Arc::new(InMemoryAuditStore::new()),
//! );
//!
//! let now = Utc::now();
//! let grant = Grant::builder()
//!     .owner("recon-7")
//!     .frequency_mhz(312.5)
//!     .bandwidth_khz(25.0)
//!     .power_dbm(40.0)
//!     .location(Location::new(35.0, 45.0).unwrap())
//!     .window(TimeWindow::new(now, now + Duration::hours(1)).unwrap())
//!     .build()
//!     .unwrap();
//!
//! match engine.submit_proposal(grant).unwrap() {
//!     SubmitOutcome::Approved { grant_id } => println!("committed {grant_id}"),
//!     SubmitOutcome::Denied { reasons, .. } => println!("denied: {reasons:?}"),
//!     SubmitOutcome::Negotiating { session_id, .. } => {
//!         println!("contested, session {session_id}");
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

pub mod compliance;
pub mod config;
pub mod conflict;
pub mod deconflict;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod geo;
pub mod grant;
pub mod negotiation;
pub mod participant;
pub mod runtime;
pub mod store;
pub mod time;

pub use compliance::{ActionKind, ComplianceEngine, SeverityClass, Violation};
pub use config::{
    ArbiterConfig, ComplianceConfig, DeconflictionConfig, NegotiationConfig, SplitRule,
};
pub use conflict::{Conflict, ConflictKind};
pub use deconflict::{Decision, DeconflictionEngine, FrequencyBand};
pub use engine::{ArbiterEngine, EnvelopeAck, MaintenanceReport, SubmitOutcome};
pub use envelope::{Envelope, EnvelopeKind, MessageId, Scope};
pub use error::{ArbError, ArbResult, ExecutionError, ValidationError};
pub use geo::Location;
pub use grant::{Grant, GrantBuilder, GrantId, GrantStatus, ParticipantId, Priority};
pub use negotiation::{
    NegotiationCoordinator, Resolution, ResolutionKind, RoundOutcome, SessionId, SessionState,
    SubmitAck,
};
pub use participant::Participant;
pub use runtime::{ArbRequest, ArbResponse, ArbRuntime, ExecutionHandle, RuntimeConfig};
pub use store::{
    AllocationStore, AuditStore, CommitOutcome, DenialRecord, InMemoryAllocationStore,
    InMemoryAuditStore, OutcomeRecord, StorageError,
};
pub use time::TimeWindow;
