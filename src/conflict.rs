//! Conflict types for tracking spectrum contention.
//!
//! Conflicts are explicit records, not hidden errors. When a proposed grant
//! contends with a committed one we create a `Conflict` carrying the pair of
//! grants, the contention kind, and a deterministic severity score.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::grant::GrantId;

/// The kind of contention between two grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    /// Occupied frequency ranges overlap.
    Frequency,

    /// Co-channel or near-channel emitters too close together.
    Geographic,

    /// Pure temporal contention (reserved for policy-layer use).
    Time,

    /// Contention introduced by a policy rule.
    Policy,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frequency => write!(f, "FREQUENCY"),
            Self::Geographic => write!(f, "GEOGRAPHIC"),
            Self::Time => write!(f, "TIME"),
            Self::Policy => write!(f, "POLICY"),
        }
    }
}

/// A detected contention between a proposed grant and an existing one.
///
/// `severity` is a pure function of the two grants and static configuration:
/// re-running detection on the same inputs always yields the same score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// The grant under evaluation.
    pub proposed: GrantId,

    /// The already-committed grant it contends with.
    pub existing: GrantId,

    /// Kind of contention.
    pub kind: ConflictKind,

    /// Severity in `[0, 1]`; higher is worse.
    pub severity: f64,

    /// Human-readable rationale.
    pub rationale: String,

    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    /// Creates a conflict record, clamping severity into `[0, 1]`.
    #[must_use]
    pub fn new(
        proposed: GrantId,
        existing: GrantId,
        kind: ConflictKind,
        severity: f64,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            proposed,
            existing,
            kind,
            severity: severity.clamp(0.0, 1.0),
            rationale: rationale.into(),
            detected_at: Utc::now(),
        }
    }
}

/// Returns the maximum severity across a set of conflicts, or 0.0 if empty.
#[must_use]
pub fn max_severity(conflicts: &[Conflict]) -> f64 {
    conflicts
        .iter()
        .map(|c| c.severity)
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_clamped() {
        let c = Conflict::new(
            GrantId::new(),
            GrantId::new(),
            ConflictKind::Frequency,
            1.7,
            "overlap",
        );
        assert!((c.severity - 1.0).abs() < f64::EPSILON);

        let c = Conflict::new(
            GrantId::new(),
            GrantId::new(),
            ConflictKind::Geographic,
            -0.2,
            "near",
        );
        assert!(c.severity.abs() < f64::EPSILON);
    }

    #[test]
    fn max_severity_of_empty_is_zero() {
        assert!(max_severity(&[]).abs() < f64::EPSILON);
    }

    #[test]
    fn max_severity_picks_largest() {
        let a = Conflict::new(GrantId::new(), GrantId::new(), ConflictKind::Frequency, 0.3, "");
        let b = Conflict::new(GrantId::new(), GrantId::new(), ConflictKind::Geographic, 0.8, "");
        assert!((max_severity(&[a, b]) - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn kind_display() {
        assert_eq!(format!("{}", ConflictKind::Frequency), "FREQUENCY");
        assert_eq!(format!("{}", ConflictKind::Policy), "POLICY");
    }
}
