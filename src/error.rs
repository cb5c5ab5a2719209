//! Error types for specarb.
//!
//! All errors are strongly typed using thiserror. This enables pattern
//! matching on specific failure conditions and keeps error messages uniform
//! across the admission and negotiation paths.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::grant::{GrantId, ParticipantId};
use crate::negotiation::SessionId;
use crate::store::StorageError;

/// Validation errors that occur before a proposal reaches the deconfliction
/// engine. These are never retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Center frequency must be a positive, finite value.
    #[error("Frequency must be positive, got {value} Hz")]
    NonPositiveFrequency {
        /// The rejected value in Hz.
        value: f64,
    },

    /// Bandwidth must be a positive, finite value.
    #[error("Bandwidth must be positive, got {value} Hz")]
    NonPositiveBandwidth {
        /// The rejected value in Hz.
        value: f64,
    },

    /// A time window's start must precede its end.
    #[error("Invalid time window: start ({start}) must be before end ({end})")]
    InvalidTimeWindow {
        /// Requested start.
        start: DateTime<Utc>,
        /// Requested end.
        end: DateTime<Utc>,
    },

    /// Latitude outside the valid range.
    #[error("Latitude {value} is out of range [-90, 90]")]
    LatitudeOutOfRange {
        /// The rejected value in degrees.
        value: f64,
    },

    /// Longitude outside the valid range.
    #[error("Longitude {value} is out of range [-180, 180]")]
    LongitudeOutOfRange {
        /// The rejected value in degrees.
        value: f64,
    },

    /// A required builder field was not set.
    #[error("Required field '{field}' is missing")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// The minimum acceptable duration does not fit the requested window.
    #[error("Minimum duration {min_secs}s exceeds the requested window of {window_secs}s")]
    MinDurationExceedsWindow {
        /// Requested minimum in seconds.
        min_secs: i64,
        /// Window length in seconds.
        window_secs: i64,
    },
}

/// Execution errors raised while driving admission or negotiation.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The referenced grant does not exist.
    #[error("Grant not found: {id}")]
    GrantNotFound {
        /// The unknown grant.
        id: GrantId,
    },

    /// The referenced session does not exist (or was finalized).
    #[error("Negotiation session not found: {id}")]
    SessionNotFound {
        /// The unknown session.
        id: SessionId,
    },

    /// The session is no longer accepting round messages.
    #[error("Session {id} is {state}; operation requires an active session")]
    SessionNotActive {
        /// The session.
        id: SessionId,
        /// Its current state.
        state: String,
    },

    /// Overrides apply only to escalated sessions.
    #[error("Session {id} is not escalated; override not accepted")]
    SessionNotEscalated {
        /// The session.
        id: SessionId,
    },

    /// The sender is not an active participant of the session.
    #[error("Participant {participant} is not part of session {session}")]
    NotAParticipant {
        /// The session.
        session: SessionId,
        /// The rejected sender.
        participant: ParticipantId,
    },

    /// The bounded session registry is at capacity.
    #[error("Session registry is full (capacity {capacity})")]
    RegistryFull {
        /// Configured capacity.
        capacity: usize,
    },

    /// A commit kept racing other writers past the retry limit.
    #[error("Commit retries exhausted after {attempts} attempts on grant {grant}")]
    CommitRetriesExhausted {
        /// The grant that could not commit.
        grant: GrantId,
        /// Attempts made.
        attempts: u32,
    },

    /// Cancellation attempted by a non-owner.
    #[error("Only the owner may cancel grant {grant}")]
    NotOwner {
        /// The grant.
        grant: GrantId,
    },

    /// A blocking wait exceeded its deadline.
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        /// The elapsed deadline in milliseconds.
        duration_ms: u64,
    },

    /// A bounded worker queue rejected a request.
    #[error("Worker queue for the {path} path is full (capacity {capacity})")]
    QueueFull {
        /// Which pool.
        path: String,
        /// Configured queue depth.
        capacity: usize,
    },

    /// The worker pool has shut down.
    #[error("Worker pool for the {path} path has shut down")]
    Disconnected {
        /// Which pool.
        path: String,
    },
}

/// Top-level error type for the crate.
#[derive(Debug, Error)]
pub enum ArbError {
    /// Input failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Execution failed.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Storage backend failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Internal invariant broken.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ArbError {
    /// Creates an internal error from a message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Convenient result alias used throughout the crate.
pub type ArbResult<T> = Result<T, ArbError>;
