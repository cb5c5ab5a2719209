//! Deconfliction engine: contention detection and severity scoring.
//!
//! Pure functions over a proposed grant and the active set. Detection runs in
//! three stages: a cheap temporal filter, a bandwidth-aware frequency-overlap
//! check, and a co-channel interference model based on free-space path loss.
//! Severity is deterministic: the same pair of grants and the same config
//! always produce the same score.

use serde::{Deserialize, Serialize};

use crate::config::DeconflictionConfig;
use crate::conflict::{max_severity, Conflict, ConflictKind};
use crate::grant::Grant;

/// A contiguous frequency band in MHz, used to bound alternative scans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    /// Low edge in MHz (inclusive).
    pub low_mhz: f64,

    /// High edge in MHz (inclusive).
    pub high_mhz: f64,
}

impl FrequencyBand {
    /// Creates a band.
    #[must_use]
    pub const fn new(low_mhz: f64, high_mhz: f64) -> Self {
        Self { low_mhz, high_mhz }
    }

    /// The band spanning ±10% around a center frequency.
    #[must_use]
    pub fn around(center_mhz: f64) -> Self {
        let margin = center_mhz * 0.1;
        Self {
            low_mhz: center_mhz - margin,
            high_mhz: center_mhz + margin,
        }
    }
}

/// Admission decision derived from a conflict set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// No conflicts: commit directly.
    Approve,

    /// At least one conflict above the deny threshold.
    Deny,

    /// Contested: route to negotiation.
    Negotiate,
}

/// Detects and scores spectrum contention.
#[derive(Debug, Clone, Default)]
pub struct DeconflictionEngine {
    config: DeconflictionConfig,
}

impl DeconflictionEngine {
    /// Creates an engine over the given configuration.
    #[must_use]
    pub fn new(config: DeconflictionConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &DeconflictionConfig {
        &self.config
    }

    /// Checks a proposed grant against the active set.
    ///
    /// Returns every detected conflict; an empty vector means the proposal
    /// is clean. Grants with disjoint time windows never conflict.
    #[must_use]
    pub fn check_conflicts(&self, proposed: &Grant, active: &[Grant]) -> Vec<Conflict> {
        let mut conflicts = Vec::new();

        for existing in active {
            if existing.id == proposed.id {
                continue;
            }
            // Temporal filter first: disjoint windows cannot contend.
            if !proposed.window.overlaps(&existing.window) {
                continue;
            }

            if let Some(conflict) = self.frequency_overlap(proposed, existing) {
                conflicts.push(conflict);
            }
            if let Some(conflict) = self.interference(proposed, existing) {
                conflicts.push(conflict);
            }
        }

        conflicts
    }

    /// Bandwidth-aware frequency-domain overlap: occupied ranges
    /// (center ± bandwidth/2) that intersect while the emitters are inside
    /// the minimum geographic separation. Severity is the overlap as a
    /// fraction of the proposed bandwidth. Beyond the separation minimum the
    /// spectrum is spatially reused and no conflict is emitted.
    fn frequency_overlap(&self, proposed: &Grant, existing: &Grant) -> Option<Conflict> {
        let distance_km = proposed.location.distance_km(&existing.location);
        if distance_km >= self.config.min_geographic_separation_km {
            return None;
        }

        let (p_low, p_high) = proposed.frequency_range_mhz();
        let (e_low, e_high) = existing.frequency_range_mhz();

        if p_high <= e_low || p_low >= e_high {
            return None;
        }

        let overlap_mhz = p_high.min(e_high) - p_low.max(e_low);
        let severity = (overlap_mhz / proposed.bandwidth_mhz()).min(1.0);

        Some(Conflict::new(
            proposed.id,
            existing.id,
            ConflictKind::Frequency,
            severity,
            format!(
                "frequency overlap with {}: {overlap_mhz:.3} MHz of the proposed \
                 {:.3} MHz occupied range collides at {:.3} MHz",
                existing.owner,
                proposed.bandwidth_mhz(),
                existing.frequency_mhz()
            ),
        ))
    }

    /// Co-channel interference model. Applies only when both the frequency
    /// separation and the great-circle distance fall below the configured
    /// minima; severity comes from a simplified free-space path loss budget.
    fn interference(&self, proposed: &Grant, existing: &Grant) -> Option<Conflict> {
        let separation_mhz = (proposed.frequency_mhz() - existing.frequency_mhz()).abs();
        let distance_km = proposed.location.distance_km(&existing.location);

        if separation_mhz >= self.config.min_frequency_separation_mhz
            || distance_km >= self.config.min_geographic_separation_km
        {
            return None;
        }

        let severity = self.severity(existing.power_dbm, existing.frequency_mhz(), separation_mhz, distance_km);
        if severity <= 0.0 {
            return None;
        }

        Some(Conflict::new(
            proposed.id,
            existing.id,
            ConflictKind::Geographic,
            severity,
            format!(
                "co-channel interference with {}: {distance_km:.1} km separation \
                 (minimum {:.1} km) at {separation_mhz:.3} MHz offset",
                existing.owner, self.config.min_geographic_separation_km
            ),
        ))
    }

    /// Interference severity in `[0, 1]`.
    ///
    /// `path_loss_db = 20 log10(d_km) + 20 log10(f_mhz) + 32.45` (free-space,
    /// simplified), received power is the victim's transmit power minus path
    /// loss, and the margin over receiver sensitivity is discounted by
    /// adjacent-channel rejection before normalization.
    #[must_use]
    pub fn severity(
        &self,
        power_dbm: f64,
        freq_mhz: f64,
        separation_mhz: f64,
        distance_km: f64,
    ) -> f64 {
        // Avoid log(0) for co-located emitters.
        let distance_km = distance_km.max(0.001);

        let path_loss_db = 20.0 * distance_km.log10() + 20.0 * freq_mhz.log10() + 32.45;
        let received_dbm = power_dbm - path_loss_db;
        let margin_db = received_dbm - self.config.receiver_sensitivity_dbm;

        let rejection_db = (separation_mhz * self.config.rejection_db_per_mhz)
            .min(self.config.max_rejection_db);
        let effective_db = margin_db - rejection_db;

        (effective_db / self.config.severity_norm_db).clamp(0.0, 1.0)
    }

    /// Suggests up to `config.suggestion_limit` alternative center
    /// frequencies inside `band` that keep at least the minimum frequency
    /// separation from every conflicting frequency.
    ///
    /// The scan is a fixed-step ascending sweep from the low band edge, so
    /// the output is fully deterministic: same inputs, same ordered output.
    #[must_use]
    pub fn suggest_alternatives(
        &self,
        band: FrequencyBand,
        conflicting_mhz: &[f64],
    ) -> Vec<f64> {
        let mut suggestions = Vec::with_capacity(self.config.suggestion_limit);
        let step = self.config.suggestion_step_mhz;
        if step <= 0.0 || band.high_mhz < band.low_mhz {
            return suggestions;
        }

        let mut candidate = band.low_mhz;
        while candidate <= band.high_mhz && suggestions.len() < self.config.suggestion_limit {
            let clear = conflicting_mhz
                .iter()
                .all(|f| (candidate - f).abs() > self.config.min_frequency_separation_mhz);
            if clear && candidate > 0.0 {
                suggestions.push(candidate);
            }
            candidate += step;
        }

        suggestions
    }

    /// Admission decision policy: APPROVE a clean proposal, DENY when any
    /// conflict exceeds the deny threshold, otherwise route to negotiation.
    #[must_use]
    pub fn decide(&self, conflicts: &[Conflict]) -> Decision {
        if conflicts.is_empty() {
            Decision::Approve
        } else if max_severity(conflicts) > self.config.deny_threshold {
            Decision::Deny
        } else {
            Decision::Negotiate
        }
    }
}
