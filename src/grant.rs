//! Grant types: the unit of spectrum allocation.
//!
//! A `Grant` is a request for (and, once approved, a commitment of) a slice
//! of spectrum: a center frequency and bandwidth, at a location, over a time
//! window, at a transmit power. Grants are created `Pending` and move through
//! the admission pipeline to a terminal status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compliance::ActionKind;
use crate::error::ValidationError;
use crate::geo::Location;
use crate::time::TimeWindow;

/// Unique identifier for a grant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GrantId(Uuid);

impl GrantId {
    /// Creates a new random grant ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GrantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a participant (requester) in the system.
///
/// Participants are opaque to the core; this is just a stable name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Creates a participant ID from a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The underlying name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Request priority. The ordering is total and used as an automated
/// tie-break: `Routine < Priority < Immediate < Flash`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Default precedence.
    Routine,

    /// Above routine traffic.
    Priority,

    /// Time-critical traffic.
    Immediate,

    /// Highest precedence; subject to the concurrent-FLASH cap.
    Flash,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Routine => write!(f, "ROUTINE"),
            Self::Priority => write!(f, "PRIORITY"),
            Self::Immediate => write!(f, "IMMEDIATE"),
            Self::Flash => write!(f, "FLASH"),
        }
    }
}

/// Lifecycle status of a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantStatus {
    /// Submitted, not yet evaluated.
    Pending,

    /// Committed to the allocation store.
    Approved,

    /// Rejected; kept only in the audit record.
    Denied,

    /// Contested; referenced by a negotiation session.
    Conflict,

    /// Time window elapsed; removed from the active query set.
    Expired,
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Denied => write!(f, "DENIED"),
            Self::Conflict => write!(f, "CONFLICT"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// A spectrum grant: either a proposal under evaluation or a committed
/// allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    /// Unique identifier.
    pub id: GrantId,

    /// The participant that owns this grant.
    pub owner: ParticipantId,

    /// Center frequency in Hz.
    pub frequency_hz: f64,

    /// Bandwidth in Hz.
    pub bandwidth_hz: f64,

    /// Transmit power in dBm.
    pub power_dbm: f64,

    /// Transmitter location.
    pub location: Location,

    /// Requested time window.
    pub window: TimeWindow,

    /// Request priority.
    pub priority: Priority,

    /// Kind of action the emission supports; drives the policy gate.
    pub action: ActionKind,

    /// Free-text purpose of the emission.
    pub purpose: String,

    /// Current lifecycle status.
    pub status: GrantStatus,

    /// Shortest acceptable occupancy, consumed by time-sharing resolution.
    /// `None` means any split is acceptable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_duration_secs: Option<i64>,

    /// When the grant was submitted.
    pub submitted_at: DateTime<Utc>,
}

impl Grant {
    /// Starts building a grant.
    #[must_use]
    pub fn builder() -> GrantBuilder {
        GrantBuilder::default()
    }

    /// Center frequency in MHz.
    #[must_use]
    pub fn frequency_mhz(&self) -> f64 {
        self.frequency_hz / 1_000_000.0
    }

    /// Bandwidth in MHz.
    #[must_use]
    pub fn bandwidth_mhz(&self) -> f64 {
        self.bandwidth_hz / 1_000_000.0
    }

    /// Occupied frequency range `(low, high)` in MHz, center ± bandwidth/2.
    #[must_use]
    pub fn frequency_range_mhz(&self) -> (f64, f64) {
        let half = self.bandwidth_mhz() / 2.0;
        (self.frequency_mhz() - half, self.frequency_mhz() + half)
    }
}

/// Builder for `Grant` with validation.
#[derive(Debug, Default)]
pub struct GrantBuilder {
    owner: Option<ParticipantId>,
    frequency_hz: Option<f64>,
    bandwidth_hz: Option<f64>,
    power_dbm: Option<f64>,
    location: Option<Location>,
    window: Option<TimeWindow>,
    priority: Option<Priority>,
    action: Option<ActionKind>,
    purpose: Option<String>,
    min_duration_secs: Option<i64>,
}

impl GrantBuilder {
    /// Sets the owning participant.
    #[must_use]
    pub fn owner(mut self, owner: impl Into<ParticipantId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Sets the center frequency in Hz.
    #[must_use]
    pub fn frequency_hz(mut self, hz: f64) -> Self {
        self.frequency_hz = Some(hz);
        self
    }

    /// Sets the center frequency in MHz.
    #[must_use]
    pub fn frequency_mhz(mut self, mhz: f64) -> Self {
        self.frequency_hz = Some(mhz * 1_000_000.0);
        self
    }

    /// Sets the bandwidth in Hz.
    #[must_use]
    pub fn bandwidth_hz(mut self, hz: f64) -> Self {
        self.bandwidth_hz = Some(hz);
        self
    }

    /// Sets the bandwidth in kHz.
    #[must_use]
    pub fn bandwidth_khz(mut self, khz: f64) -> Self {
        self.bandwidth_hz = Some(khz * 1_000.0);
        self
    }

    /// Sets the transmit power in dBm.
    #[must_use]
    pub fn power_dbm(mut self, dbm: f64) -> Self {
        self.power_dbm = Some(dbm);
        self
    }

    /// Sets the transmitter location.
    #[must_use]
    pub fn location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the requested time window.
    #[must_use]
    pub fn window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the action kind.
    #[must_use]
    pub fn action(mut self, action: ActionKind) -> Self {
        self.action = Some(action);
        self
    }

    /// Sets the purpose text.
    #[must_use]
    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Sets the minimum acceptable duration for time-sharing splits.
    #[must_use]
    pub fn min_duration_secs(mut self, secs: i64) -> Self {
        self.min_duration_secs = Some(secs);
        self
    }

    /// Builds the grant, validating all invariants.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if a required field is missing, the
    /// frequency or bandwidth is non-positive, or the minimum duration does
    /// not fit the requested window.
    pub fn build(self) -> Result<Grant, ValidationError> {
        let owner = self
            .owner
            .ok_or(ValidationError::MissingField { field: "owner" })?;
        let frequency_hz = self
            .frequency_hz
            .ok_or(ValidationError::MissingField { field: "frequency_hz" })?;
        let bandwidth_hz = self
            .bandwidth_hz
            .ok_or(ValidationError::MissingField { field: "bandwidth_hz" })?;
        let power_dbm = self
            .power_dbm
            .ok_or(ValidationError::MissingField { field: "power_dbm" })?;
        let location = self
            .location
            .ok_or(ValidationError::MissingField { field: "location" })?;
        let window = self
            .window
            .ok_or(ValidationError::MissingField { field: "window" })?;

        if frequency_hz <= 0.0 || !frequency_hz.is_finite() {
            return Err(ValidationError::NonPositiveFrequency { value: frequency_hz });
        }
        if bandwidth_hz <= 0.0 || !bandwidth_hz.is_finite() {
            return Err(ValidationError::NonPositiveBandwidth { value: bandwidth_hz });
        }
        if let Some(min_secs) = self.min_duration_secs {
            let window_secs = window.duration().num_seconds();
            if min_secs > window_secs {
                return Err(ValidationError::MinDurationExceedsWindow {
                    min_secs,
                    window_secs,
                });
            }
        }

        Ok(Grant {
            id: GrantId::new(),
            owner,
            frequency_hz,
            bandwidth_hz,
            power_dbm,
            location,
            window,
            priority: self.priority.unwrap_or(Priority::Routine),
            action: self.action.unwrap_or(ActionKind::Communication),
            purpose: self.purpose.unwrap_or_default(),
            status: GrantStatus::Pending,
            min_duration_secs: self.min_duration_secs,
            submitted_at: Utc::now(),
        })
    }
}
