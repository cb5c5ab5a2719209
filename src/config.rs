//! Static configuration for the admission and negotiation engines.
//!
//! Every tunable lives here so that conflict severity and policy decisions
//! stay deterministic functions of their inputs plus one config snapshot.

use serde::{Deserialize, Serialize};

use crate::compliance::{PowerLimit, ProtectedArea, ProtectedBand};

/// Deconfliction engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeconflictionConfig {
    /// Minimum safe separation between center frequencies, in MHz.
    pub min_frequency_separation_mhz: f64,

    /// Minimum distance for co-channel operation, in km.
    pub min_geographic_separation_km: f64,

    /// Receiver sensitivity threshold in dBm.
    pub receiver_sensitivity_dbm: f64,

    /// Adjacent-channel rejection slope, dB per MHz of separation.
    pub rejection_db_per_mhz: f64,

    /// Ceiling on adjacent-channel rejection, in dB.
    pub max_rejection_db: f64,

    /// Severity normalization: dB of effective margin mapping to severity 1.0.
    pub severity_norm_db: f64,

    /// Conflicts above this severity force a DENY instead of negotiation.
    pub deny_threshold: f64,

    /// Scan step for alternative-frequency suggestions, in MHz.
    pub suggestion_step_mhz: f64,

    /// Maximum number of alternative frequencies to suggest.
    pub suggestion_limit: usize,
}

impl Default for DeconflictionConfig {
    fn default() -> Self {
        Self {
            min_frequency_separation_mhz: 5.0,
            min_geographic_separation_km: 50.0,
            receiver_sensitivity_dbm: -90.0,
            rejection_db_per_mhz: 2.0,
            max_rejection_db: 60.0,
            severity_norm_db: 20.0,
            deny_threshold: 0.7,
            suggestion_step_mhz: 10.0,
            suggestion_limit: 3,
        }
    }
}

/// How a contested window is divided during time-sharing resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitRule {
    /// Split the contested region evenly.
    Equal,

    /// Split proportionally to each participant's requested duration.
    Proportional,
}

/// Negotiation coordinator tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Maximum rounds before automatic resolution applies.
    pub max_rounds: u32,

    /// Per-round response deadline, in seconds. Must not exceed
    /// `decision_timeout_secs`.
    pub round_timeout_secs: i64,

    /// Overall per-participant decision deadline, in seconds.
    pub decision_timeout_secs: i64,

    /// Total session deadline before forced escalation, in seconds.
    pub session_timeout_secs: i64,

    /// Capacity of the session registry.
    pub registry_capacity: usize,

    /// Bounded retries for commits racing on an overlapping neighborhood.
    pub commit_retry_limit: u32,

    /// Split rule applied by time-sharing resolution.
    pub split_rule: SplitRule,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            round_timeout_secs: 30,
            decision_timeout_secs: 120,
            session_timeout_secs: 600,
            registry_capacity: 256,
            commit_retry_limit: 3,
            split_rule: SplitRule::Proportional,
        }
    }
}

/// Compliance (policy) engine configuration: protected bands, protected
/// areas, and per-band power limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    /// Bands in which energy-emitting actions are forbidden.
    pub protected_bands: Vec<ProtectedBand>,

    /// Geographic areas in which emissions are restricted.
    pub protected_areas: Vec<ProtectedArea>,

    /// Per-band transmit power ceilings.
    pub power_limits: Vec<PowerLimit>,

    /// Maximum simultaneous FLASH-priority grants.
    pub max_concurrent_flash: usize,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            protected_bands: vec![
                ProtectedBand::new("civil-aviation-emergency", 121.5, 121.5),
                ProtectedBand::new("military-emergency", 243.0, 243.0),
                ProtectedBand::new("cospas-sarsat", 406.0, 406.1),
                // FM broadcast / navigation band used by the worked scenarios.
                ProtectedBand::new("civil-broadcast", 88.0, 108.0),
            ],
            protected_areas: Vec::new(),
            power_limits: vec![
                PowerLimit::new(30.0, 88.0, 50.0),
                PowerLimit::new(225.0, 400.0, 55.0),
                PowerLimit::new(1000.0, 2000.0, 60.0),
            ],
            max_concurrent_flash: 5,
        }
    }
}

/// Top-level configuration for the arbiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArbiterConfig {
    /// Deconfliction tunables.
    pub deconfliction: DeconflictionConfig,

    /// Compliance policy.
    pub compliance: ComplianceConfig,

    /// Negotiation tunables.
    pub negotiation: NegotiationConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = DeconflictionConfig::default();
        assert!((cfg.min_frequency_separation_mhz - 5.0).abs() < f64::EPSILON);
        assert!((cfg.min_geographic_separation_km - 50.0).abs() < f64::EPSILON);
        assert!((cfg.receiver_sensitivity_dbm + 90.0).abs() < f64::EPSILON);
        assert!((cfg.deny_threshold - 0.7).abs() < f64::EPSILON);

        let neg = NegotiationConfig::default();
        assert_eq!(neg.max_rounds, 5);
        assert_eq!(neg.commit_retry_limit, 3);
        assert_eq!(neg.split_rule, SplitRule::Proportional);
        assert!(neg.round_timeout_secs <= neg.decision_timeout_secs);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = ArbiterConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ArbiterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.negotiation.max_rounds, cfg.negotiation.max_rounds);
        assert_eq!(
            back.compliance.protected_bands.len(),
            cfg.compliance.protected_bands.len()
        );
    }
}
