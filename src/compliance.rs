//! Compliance engine: the static policy gate.
//!
//! Checks a proposed action against rules of engagement: protected frequency
//! bands, protected geographic areas, per-band power ceilings, and the
//! concurrent-FLASH cap. Pure function of its inputs and the static
//! configuration; no mutation, no I/O.
//!
//! A `Critical` violation is non-negotiable: it forces DENY regardless of
//! any deconfliction or negotiation outcome.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ComplianceConfig;
use crate::geo::Location;
use crate::grant::{Grant, Priority};

/// Kind of friendly action a grant supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    /// Deliberate interference with an adversary emitter.
    Jamming,

    /// Voice or data communication.
    Communication,

    /// Active sensing.
    Radar,

    /// Receive-only collection; emits no energy.
    Isr,

    /// Point-to-point data link.
    Datalink,
}

impl ActionKind {
    /// Whether this action radiates energy into the spectrum.
    #[must_use]
    pub const fn emits_energy(self) -> bool {
        !matches!(self, Self::Isr)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jamming => write!(f, "JAMMING"),
            Self::Communication => write!(f, "COMMUNICATION"),
            Self::Radar => write!(f, "RADAR"),
            Self::Isr => write!(f, "ISR"),
            Self::Datalink => write!(f, "DATALINK"),
        }
    }
}

/// Severity class of a policy violation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeverityClass {
    /// Advisory only.
    Low,

    /// Negotiable constraint.
    Medium,

    /// Serious but still negotiable.
    High,

    /// Non-negotiable: forces DENY unconditionally.
    Critical,
}

impl fmt::Display for SeverityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A policy violation found by the compliance engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Identifier of the violated rule.
    pub rule_id: String,

    /// Severity class.
    pub severity: SeverityClass,

    /// Human-readable description.
    pub description: String,
}

impl Violation {
    fn new(rule_id: impl Into<String>, severity: SeverityClass, description: String) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity,
            description,
        }
    }

    /// Whether this violation is non-negotiable.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.severity == SeverityClass::Critical
    }
}

/// A frequency band in which energy-emitting actions are forbidden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedBand {
    /// Rule identifier, e.g. "cospas-sarsat".
    pub rule_id: String,

    /// Low edge in MHz (inclusive).
    pub low_mhz: f64,

    /// High edge in MHz (inclusive).
    pub high_mhz: f64,
}

impl ProtectedBand {
    /// Creates a protected band.
    #[must_use]
    pub fn new(rule_id: impl Into<String>, low_mhz: f64, high_mhz: f64) -> Self {
        Self {
            rule_id: rule_id.into(),
            low_mhz,
            high_mhz,
        }
    }

    fn contains(&self, freq_mhz: f64) -> bool {
        (self.low_mhz..=self.high_mhz).contains(&freq_mhz)
    }
}

/// A geographic area in which emissions are restricted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedArea {
    /// Rule identifier, e.g. "medical-facility-alpha".
    pub rule_id: String,

    /// Center of the area.
    pub center: Location,

    /// Radius in km.
    pub radius_km: f64,
}

impl ProtectedArea {
    /// Creates a protected area.
    #[must_use]
    pub fn new(rule_id: impl Into<String>, center: Location, radius_km: f64) -> Self {
        Self {
            rule_id: rule_id.into(),
            center,
            radius_km,
        }
    }
}

/// A transmit power ceiling for a frequency band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerLimit {
    /// Low edge in MHz (inclusive).
    pub low_mhz: f64,

    /// High edge in MHz (inclusive).
    pub high_mhz: f64,

    /// Maximum allowed transmit power in dBm.
    pub max_power_dbm: f64,
}

impl PowerLimit {
    /// Creates a power limit.
    #[must_use]
    pub const fn new(low_mhz: f64, high_mhz: f64, max_power_dbm: f64) -> Self {
        Self {
            low_mhz,
            high_mhz,
            max_power_dbm,
        }
    }
}

/// Enforces static policy constraints on spectrum operations.
#[derive(Debug, Clone, Default)]
pub struct ComplianceEngine {
    config: ComplianceConfig,
}

impl ComplianceEngine {
    /// Creates an engine over a policy configuration.
    #[must_use]
    pub fn new(config: ComplianceConfig) -> Self {
        Self { config }
    }

    /// Checks an action against the policy. Deterministic: identical inputs
    /// always yield an identical violation list, in rule-definition order.
    #[must_use]
    pub fn check_compliance(
        &self,
        action: ActionKind,
        frequency_mhz: f64,
        location: Location,
        power_dbm: f64,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();

        if action.emits_energy() {
            for band in &self.config.protected_bands {
                if band.contains(frequency_mhz) {
                    violations.push(Violation::new(
                        band.rule_id.clone(),
                        SeverityClass::Critical,
                        format!(
                            "{action} at {frequency_mhz:.3} MHz falls inside protected band \
                             {:.3}-{:.3} MHz",
                            band.low_mhz, band.high_mhz
                        ),
                    ));
                }
            }
        }

        for area in &self.config.protected_areas {
            let distance_km = location.distance_km(&area.center);
            if distance_km <= area.radius_km {
                violations.push(Violation::new(
                    area.rule_id.clone(),
                    SeverityClass::High,
                    format!(
                        "location is {distance_km:.1} km from the center of protected area \
                         '{}' (radius {:.1} km)",
                        area.rule_id, area.radius_km
                    ),
                ));
            }
        }

        for limit in &self.config.power_limits {
            if (limit.low_mhz..=limit.high_mhz).contains(&frequency_mhz)
                && power_dbm > limit.max_power_dbm
            {
                violations.push(Violation::new(
                    format!("power-limit-{:.0}-{:.0}", limit.low_mhz, limit.high_mhz),
                    SeverityClass::High,
                    format!(
                        "power {power_dbm:.1} dBm exceeds the {:.1} dBm ceiling for \
                         {:.0}-{:.0} MHz",
                        limit.max_power_dbm, limit.low_mhz, limit.high_mhz
                    ),
                ));
            }
        }

        violations
    }

    /// Checks a grant, including the concurrent-FLASH admission rule.
    /// `current_flash_count` is the number of FLASH grants already active.
    #[must_use]
    pub fn check_grant(&self, grant: &Grant, current_flash_count: usize) -> Vec<Violation> {
        let mut violations = self.check_compliance(
            grant.action,
            grant.frequency_mhz(),
            grant.location,
            grant.power_dbm,
        );

        if grant.priority == Priority::Flash
            && current_flash_count >= self.config.max_concurrent_flash
        {
            violations.push(Violation::new(
                "max-concurrent-flash",
                SeverityClass::Medium,
                format!(
                    "maximum concurrent FLASH grants exceeded ({current_flash_count}/{})",
                    self.config.max_concurrent_flash
                ),
            ));
        }

        violations
    }

    /// Whether any violation in the list is critical.
    #[must_use]
    pub fn has_critical(violations: &[Violation]) -> bool {
        violations.iter().any(Violation::is_critical)
    }
}
