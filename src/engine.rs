//! The arbiter engine: admission pipeline and session finalization.
//!
//! `submit_proposal` runs the full admission pipeline: validation happened
//! at build time, so the pipeline is the compliance gate, conflict
//! detection against the committed neighborhood, the decision policy, and
//! then either an atomic commit, a denial with alternatives, or a
//! negotiation session. `run_maintenance` drives expiry, session
//! deadlines, and finalization of resolved sessions.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::compliance::ComplianceEngine;
use crate::config::ArbiterConfig;
use crate::conflict::Conflict;
use crate::deconflict::{Decision, DeconflictionEngine, FrequencyBand};
use crate::envelope::{
    AcceptPayload, CounterPayload, Envelope, EnvelopeKind, OverridePayload, Scope,
};
use crate::error::{ArbError, ArbResult, ExecutionError};
use crate::grant::{Grant, GrantId, GrantStatus, ParticipantId, Priority};
use crate::negotiation::{
    EscalationSnapshot, FinishedSession, NegotiationCoordinator, Resolution, SessionId,
    SubmitAck,
};
use crate::participant::Participant;
use crate::store::{
    AllocationStore, AuditStore, CommitOutcome, DenialRecord, OutcomeRecord,
};

/// Outcome of a proposal submission.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Committed to the allocation store.
    Approved {
        /// The committed grant.
        grant_id: GrantId,
    },

    /// Rejected outright.
    Denied {
        /// The rejected grant.
        grant_id: GrantId,

        /// Why it was rejected.
        reasons: Vec<String>,

        /// Alternative center frequencies that would clear the contention.
        alternatives_mhz: Vec<f64>,
    },

    /// Contested; a negotiation session is underway.
    Negotiating {
        /// The contested grant.
        grant_id: GrantId,

        /// The session arbitrating it.
        session_id: SessionId,
    },
}

/// Acknowledgement of an envelope applied through [`ArbiterEngine::apply_envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeAck {
    /// A round message was applied (or deduplicated).
    Round(SubmitAck),

    /// The sender withdrew from the session.
    Withdrawn,

    /// An override was applied to an escalated session.
    Overridden,
}

/// What a maintenance pass did.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    /// Approved grants whose windows elapsed.
    pub expired: usize,

    /// Sessions finalized during this pass.
    pub finalized: Vec<SessionId>,
}

struct PendingProposal {
    owner: ParticipantId,
    session: SessionId,
}

/// Spectrum admission and negotiation engine.
pub struct ArbiterEngine {
    allocations: Arc<dyn AllocationStore>,
    audit: Arc<dyn AuditStore>,
    compliance: ComplianceEngine,
    decon: DeconflictionEngine,
    coordinator: NegotiationCoordinator,
    commit_retry_limit: u32,
    pending: RwLock<HashMap<GrantId, PendingProposal>>,
}

impl ArbiterEngine {
    /// Creates an engine over the given stores and configuration.
    #[must_use]
    pub fn new(
        config: ArbiterConfig,
        allocations: Arc<dyn AllocationStore>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        let decon = DeconflictionEngine::new(config.deconfliction.clone());
        Self {
            allocations,
            audit,
            compliance: ComplianceEngine::new(config.compliance),
            decon: decon.clone(),
            coordinator: NegotiationCoordinator::new(config.negotiation.clone(), decon),
            commit_retry_limit: config.negotiation.commit_retry_limit,
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// The negotiation coordinator, for direct session interaction.
    #[must_use]
    pub fn coordinator(&self) -> &NegotiationCoordinator {
        &self.coordinator
    }

    /// Registers a participant callback handler.
    ///
    /// # Errors
    ///
    /// Fails if the coordinator's handler table is poisoned.
    pub fn register_participant(
        &self,
        id: ParticipantId,
        handler: Arc<dyn Participant>,
    ) -> ArbResult<()> {
        self.coordinator.register_participant(id, handler)
    }

    /// Runs the admission pipeline on a proposed grant.
    ///
    /// # Errors
    ///
    /// Fails on storage errors or when the session registry is full; policy
    /// and contention rejections are reported through [`SubmitOutcome`], not
    /// as errors.
    pub fn submit_proposal(&self, grant: Grant) -> ArbResult<SubmitOutcome> {
        let now = Utc::now();
        info!(
            grant = %grant.id,
            owner = %grant.owner,
            frequency_mhz = grant.frequency_mhz(),
            priority = %grant.priority,
            "proposal submitted"
        );

        // Hard policy gate first: a CRITICAL violation is non-negotiable.
        let flash_count = self.active_flash_count(now)?;
        let violations = self.compliance.check_grant(&grant, flash_count);
        if ComplianceEngine::has_critical(&violations) {
            let reasons: Vec<String> =
                violations.iter().map(|v| v.description.clone()).collect();
            warn!(grant = %grant.id, "proposal denied by policy");
            self.record_denial(&grant, &reasons, now)?;
            return Ok(SubmitOutcome::Denied {
                grant_id: grant.id,
                reasons,
                alternatives_mhz: Vec::new(),
            });
        }
        for violation in &violations {
            debug!(grant = %grant.id, rule = %violation.rule_id, severity = %violation.severity,
                "advisory policy violation");
        }

        let neighborhood = self.allocations.get_overlapping(&grant.window)?;
        let conflicts = self.decon.check_conflicts(&grant, &neighborhood);
        if !conflicts.is_empty() {
            self.audit.record_conflicts(&conflicts)?;
        }

        match self.decon.decide(&conflicts) {
            Decision::Approve => self.commit_with_retry(grant, now),
            Decision::Deny => {
                let reasons: Vec<String> =
                    conflicts.iter().map(|c| c.rationale.clone()).collect();
                let alternatives = self.alternatives_for(&grant, &conflicts, &neighborhood);
                warn!(grant = %grant.id, conflicts = conflicts.len(), "proposal denied");
                self.record_denial(&grant, &reasons, now)?;
                Ok(SubmitOutcome::Denied {
                    grant_id: grant.id,
                    reasons,
                    alternatives_mhz: alternatives,
                })
            }
            Decision::Negotiate => self.open_negotiation(grant, &conflicts, now),
        }
    }

    /// Cancels a pending contested proposal (withdrawing it from its
    /// session) or removes a committed grant.
    ///
    /// # Errors
    ///
    /// Fails if the grant is unknown or `requester` does not own it.
    pub fn cancel_proposal(&self, id: GrantId, requester: &ParticipantId) -> ArbResult<()> {
        let pending = {
            let table = self
                .pending
                .read()
                .map_err(|_| ArbError::internal("pending table lock poisoned"))?;
            table
                .get(&id)
                .map(|p| (p.owner.clone(), p.session))
        };

        if let Some((owner, session)) = pending {
            if owner != *requester {
                return Err(ExecutionError::NotOwner { grant: id }.into());
            }
            self.coordinator.withdraw(session, requester, Utc::now())?;
            self.finalize_finished()?;
            self.forget_pending(&[id])?;
            info!(grant = %id, session = %session, "contested proposal withdrawn");
            return Ok(());
        }

        let committed = self
            .allocations
            .get(id)?
            .ok_or(ExecutionError::GrantNotFound { id })?;
        if committed.owner != *requester {
            return Err(ExecutionError::NotOwner { grant: id }.into());
        }
        self.allocations.remove(id)?;
        info!(grant = %id, owner = %requester, "committed grant cancelled");
        Ok(())
    }

    /// Abandons a session without a resolution and finalizes it.
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown or already terminal.
    pub fn cancel_session(&self, id: SessionId, reason: &str) -> ArbResult<()> {
        self.coordinator.cancel_session(id, reason)?;
        self.finalize_finished()?;
        Ok(())
    }

    /// Applies a human override to an escalated session and finalizes the
    /// resolution immediately.
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown or not escalated.
    pub fn submit_override(&self, id: SessionId, resolution: Resolution) -> ArbResult<()> {
        self.coordinator.submit_override(id, resolution)?;
        self.finalize_finished()?;
        Ok(())
    }

    /// Applies a transport envelope: decodes the payload and routes it to
    /// the addressed session.
    ///
    /// # Errors
    ///
    /// Fails when the scope does not address a session, the payload does
    /// not decode, or the session rejects the message.
    pub fn apply_envelope(&self, envelope: &Envelope) -> ArbResult<EnvelopeAck> {
        let Scope::Session(session) = envelope.scope else {
            return Err(ArbError::internal(
                "envelope kind requires a session scope",
            ));
        };
        let now = Utc::now();
        match envelope.kind {
            EnvelopeKind::Counter => {
                let payload: CounterPayload = envelope
                    .decode()
                    .map_err(|e| ArbError::internal(format!("undecodable counter payload: {e}")))?;
                let ack = self.coordinator.submit_counter(
                    session,
                    &envelope.sender,
                    envelope.message_id,
                    payload.grant,
                    now,
                )?;
                self.finalize_finished()?;
                Ok(EnvelopeAck::Round(ack))
            }
            EnvelopeKind::Accept => {
                let payload: AcceptPayload = envelope
                    .decode()
                    .map_err(|e| ArbError::internal(format!("undecodable accept payload: {e}")))?;
                let ack = self.coordinator.accept(
                    session,
                    &envelope.sender,
                    envelope.message_id,
                    payload.proposal,
                    now,
                )?;
                self.finalize_finished()?;
                Ok(EnvelopeAck::Round(ack))
            }
            EnvelopeKind::Withdraw => {
                self.coordinator.withdraw(session, &envelope.sender, now)?;
                self.finalize_finished()?;
                self.forget_participant_pending(session, &envelope.sender)?;
                Ok(EnvelopeAck::Withdrawn)
            }
            EnvelopeKind::Override => {
                let payload: OverridePayload = envelope.decode().map_err(|e| {
                    ArbError::internal(format!("undecodable override payload: {e}"))
                })?;
                self.submit_override(session, payload.resolution)?;
                Ok(EnvelopeAck::Overridden)
            }
        }
    }

    /// Drives expiry and session deadlines, then finalizes every session
    /// that reached a terminal state.
    ///
    /// # Errors
    ///
    /// Fails on storage errors.
    pub fn run_maintenance(&self, now: DateTime<Utc>) -> ArbResult<MaintenanceReport> {
        let expired = self.allocations.remove_expired(now)?;
        if expired > 0 {
            debug!(expired, "expired grants pruned");
        }
        self.coordinator.tick(now)?;
        let finalized = self.finalize_finished()?;
        Ok(MaintenanceReport { expired, finalized })
    }

    /// Approved grants active at `at`.
    ///
    /// # Errors
    ///
    /// Fails on storage errors.
    pub fn active_grants(&self, at: DateTime<Utc>) -> ArbResult<Vec<Grant>> {
        Ok(self.allocations.get_active(at)?)
    }

    /// Every conflict ever detected, in detection order.
    ///
    /// # Errors
    ///
    /// Fails on storage errors.
    pub fn conflict_history(&self) -> ArbResult<Vec<Conflict>> {
        Ok(self.audit.conflict_history()?)
    }

    /// Every recorded denial.
    ///
    /// # Errors
    ///
    /// Fails on storage errors.
    pub fn denials(&self) -> ArbResult<Vec<DenialRecord>> {
        Ok(self.audit.denials()?)
    }

    /// Every recorded negotiation outcome.
    ///
    /// # Errors
    ///
    /// Fails on storage errors.
    pub fn negotiation_outcomes(&self) -> ArbResult<Vec<OutcomeRecord>> {
        Ok(self.audit.negotiation_outcomes()?)
    }

    /// Sessions awaiting a human override.
    ///
    /// # Errors
    ///
    /// Fails if the session registry is poisoned.
    pub fn pending_escalations(&self) -> ArbResult<Vec<EscalationSnapshot>> {
        self.coordinator.pending_escalations()
    }

    fn active_flash_count(&self, now: DateTime<Utc>) -> ArbResult<usize> {
        Ok(self
            .allocations
            .get_active(now)?
            .iter()
            .filter(|g| g.priority == Priority::Flash)
            .count())
    }

    /// Commits a clean proposal, re-checking atomically against the store's
    /// critical section. A commit contested by a racing writer is
    /// re-decided; persistent contention is bounded by the retry limit.
    fn commit_with_retry(&self, grant: Grant, now: DateTime<Utc>) -> ArbResult<SubmitOutcome> {
        let check = |g: &Grant, active: &[Grant]| self.decon.check_conflicts(g, active);

        for attempt in 1..=self.commit_retry_limit {
            match self.allocations.commit_checked(grant.clone(), &check)? {
                CommitOutcome::Committed => {
                    info!(grant = %grant.id, attempt, "grant approved and committed");
                    return Ok(SubmitOutcome::Approved { grant_id: grant.id });
                }
                CommitOutcome::Contested(conflicts) => {
                    warn!(grant = %grant.id, attempt, conflicts = conflicts.len(),
                        "commit contested by a racing writer");
                    self.audit.record_conflicts(&conflicts)?;
                    // Re-evaluate against refreshed state: the contending
                    // grant may have been cancelled or preempted since the
                    // contested critical section.
                    let neighborhood = self.allocations.get_overlapping(&grant.window)?;
                    let refreshed = self.decon.check_conflicts(&grant, &neighborhood);
                    match self.decon.decide(&refreshed) {
                        Decision::Approve => continue,
                        Decision::Deny => {
                            let reasons: Vec<String> =
                                refreshed.iter().map(|c| c.rationale.clone()).collect();
                            let alternatives =
                                self.alternatives_for(&grant, &refreshed, &neighborhood);
                            self.record_denial(&grant, &reasons, now)?;
                            return Ok(SubmitOutcome::Denied {
                                grant_id: grant.id,
                                reasons,
                                alternatives_mhz: alternatives,
                            });
                        }
                        Decision::Negotiate => {
                            return self.open_negotiation(grant, &refreshed, now)
                        }
                    }
                }
            }
        }

        Err(ExecutionError::CommitRetriesExhausted {
            grant: grant.id,
            attempts: self.commit_retry_limit,
        }
        .into())
    }

    /// Opens (or joins) a negotiation session for a contested proposal. The
    /// owners of the conflicting committed grants participate with those
    /// grants as their live proposals; proposals contesting the same
    /// committed grant are grouped transitively into one session.
    fn open_negotiation(
        &self,
        mut grant: Grant,
        conflicts: &[Conflict],
        now: DateTime<Utc>,
    ) -> ArbResult<SubmitOutcome> {
        grant.status = GrantStatus::Conflict;
        let contested: BTreeSet<GrantId> = conflicts.iter().map(|c| c.existing).collect();
        let contested_ids: Vec<GrantId> = contested.iter().copied().collect();

        let session_id = if let Some(existing) =
            self.coordinator.find_session_referencing(&contested_ids)?
        {
            self.coordinator
                .join_session(existing, grant.clone(), &contested)?;
            existing
        } else {
            let mut proposals = vec![grant.clone()];
            for id in &contested {
                let Some(holder) = self.allocations.get(*id)? else {
                    continue;
                };
                if holder.owner != grant.owner {
                    proposals.push(holder);
                }
            }
            if proposals.len() < 2 {
                // Every conflicting grant belongs to the proposer; there is
                // nobody to negotiate with.
                let reasons = vec![
                    "proposal conflicts only with the requester's own grants".to_string(),
                ];
                self.record_denial(&grant, &reasons, now)?;
                return Ok(SubmitOutcome::Denied {
                    grant_id: grant.id,
                    reasons,
                    alternatives_mhz: Vec::new(),
                });
            }
            self.coordinator.open_session(proposals, contested, now)?
        };

        self.pending
            .write()
            .map_err(|_| ArbError::internal("pending table lock poisoned"))?
            .insert(
                grant.id,
                PendingProposal {
                    owner: grant.owner.clone(),
                    session: session_id,
                },
            );

        info!(grant = %grant.id, session = %session_id, "proposal routed to negotiation");
        Ok(SubmitOutcome::Negotiating {
            grant_id: grant.id,
            session_id,
        })
    }

    /// Finalizes every session the coordinator has retired: commits the
    /// approved side of each resolution, removes preempted grants, and
    /// writes the audit outcome.
    fn finalize_finished(&self) -> ArbResult<Vec<SessionId>> {
        let finished = self.coordinator.take_finished()?;
        let mut finalized = Vec::with_capacity(finished.len());
        for session in finished {
            let id = session.id;
            self.finalize(session)?;
            finalized.push(id);
        }
        Ok(finalized)
    }

    fn finalize(&self, session: FinishedSession) -> ArbResult<()> {
        let now = Utc::now();
        self.audit.record_outcome(OutcomeRecord {
            session_id: session.id,
            state: session.state,
            summary: session.summary.clone(),
            recorded_at: now,
        })?;

        let Some(resolution) = session.resolution else {
            debug!(session = %session.id, state = %session.state,
                "session finalized without a resolution");
            self.forget_session_pending(session.id)?;
            return Ok(());
        };

        // Preempted committed grants leave the store before winners commit.
        for denied in &resolution.denied {
            if let Some(loser) = self.allocations.get(*denied)? {
                if loser.status == GrantStatus::Approved {
                    self.allocations.remove(*denied)?;
                    info!(grant = %denied, owner = %loser.owner, "committed grant preempted");
                }
                let mut reasons = vec![resolution.note.clone()];
                if !resolution.alternatives_mhz.is_empty() {
                    reasons.push(format!(
                        "suggested alternatives: {:?} MHz",
                        resolution.alternatives_mhz
                    ));
                }
                self.record_denial(&loser, &reasons, now)?;
            } else if let Some(owner) = self.pending_owner(*denied)? {
                self.audit.record_denial(DenialRecord {
                    grant_id: *denied,
                    owner,
                    reasons: vec![resolution.note.clone()],
                    denied_at: now,
                })?;
            }
        }

        // Winning parameters still pass the policy gate and a final
        // conflict check; a resolution is a decision, not a commit.
        let deny_threshold = self.decon.config().deny_threshold;
        for mut winner in resolution.approved {
            let flash_count = self.active_flash_count(now)?;
            let violations = self.compliance.check_grant(&winner, flash_count);
            if ComplianceEngine::has_critical(&violations) {
                let reasons: Vec<String> =
                    violations.iter().map(|v| v.description.clone()).collect();
                warn!(grant = %winner.id, session = %session.id,
                    "resolved grant denied by policy at finalization");
                self.record_denial(&winner, &reasons, now)?;
                continue;
            }

            // A time-share may adjust the window of an already committed
            // grant; replace the old record.
            if self.allocations.get(winner.id)?.is_some() {
                self.allocations.remove(winner.id)?;
            }
            winner.status = GrantStatus::Pending;

            let check = |g: &Grant, active: &[Grant]| {
                self.decon
                    .check_conflicts(g, active)
                    .into_iter()
                    .filter(|c| c.severity > deny_threshold)
                    .collect::<Vec<_>>()
            };
            match self.allocations.commit_checked(winner.clone(), &check)? {
                CommitOutcome::Committed => {
                    info!(grant = %winner.id, session = %session.id,
                        "resolved grant committed");
                }
                CommitOutcome::Contested(conflicts) => {
                    self.audit.record_conflicts(&conflicts)?;
                    let reasons: Vec<String> =
                        conflicts.iter().map(|c| c.rationale.clone()).collect();
                    warn!(grant = %winner.id, session = %session.id,
                        "resolved grant blocked by new contention");
                    self.record_denial(&winner, &reasons, now)?;
                }
            }
        }

        self.forget_session_pending(session.id)?;
        Ok(())
    }

    fn alternatives_for(
        &self,
        grant: &Grant,
        conflicts: &[Conflict],
        neighborhood: &[Grant],
    ) -> Vec<f64> {
        let contested: BTreeSet<GrantId> = conflicts.iter().map(|c| c.existing).collect();
        let conflicting_mhz: Vec<f64> = neighborhood
            .iter()
            .filter(|g| contested.contains(&g.id))
            .map(Grant::frequency_mhz)
            .collect();
        self.decon.suggest_alternatives(
            FrequencyBand::around(grant.frequency_mhz()),
            &conflicting_mhz,
        )
    }

    fn record_denial(
        &self,
        grant: &Grant,
        reasons: &[String],
        now: DateTime<Utc>,
    ) -> ArbResult<()> {
        self.audit.record_denial(DenialRecord {
            grant_id: grant.id,
            owner: grant.owner.clone(),
            reasons: reasons.to_vec(),
            denied_at: now,
        })?;
        Ok(())
    }

    fn pending_owner(&self, id: GrantId) -> ArbResult<Option<ParticipantId>> {
        Ok(self
            .pending
            .read()
            .map_err(|_| ArbError::internal("pending table lock poisoned"))?
            .get(&id)
            .map(|p| p.owner.clone()))
    }

    fn forget_pending(&self, ids: &[GrantId]) -> ArbResult<()> {
        let mut table = self
            .pending
            .write()
            .map_err(|_| ArbError::internal("pending table lock poisoned"))?;
        for id in ids {
            table.remove(id);
        }
        Ok(())
    }

    fn forget_participant_pending(
        &self,
        session: SessionId,
        participant: &ParticipantId,
    ) -> ArbResult<()> {
        let mut table = self
            .pending
            .write()
            .map_err(|_| ArbError::internal("pending table lock poisoned"))?;
        table.retain(|_, p| p.session != session || p.owner != *participant);
        Ok(())
    }

    fn forget_session_pending(&self, session: SessionId) -> ArbResult<()> {
        let mut table = self
            .pending
            .write()
            .map_err(|_| ArbError::internal("pending table lock poisoned"))?;
        table.retain(|_, p| p.session != session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::ActionKind;
    use crate::geo::Location;
    use crate::negotiation::SessionState;
    use crate::store::{InMemoryAllocationStore, InMemoryAuditStore};
    use crate::time::TimeWindow;
    use chrono::Duration;

    fn engine() -> ArbiterEngine {
        ArbiterEngine::new(
            ArbiterConfig::default(),
            Arc::new(InMemoryAllocationStore::new()),
            Arc::new(InMemoryAuditStore::new()),
        )
    }

    fn proposal(owner: &str, freq_mhz: f64, lat: f64) -> Grant {
        let now = Utc::now();
        Grant::builder()
            .owner(owner)
            .frequency_mhz(freq_mhz)
            .bandwidth_khz(25.0)
            .power_dbm(40.0)
            .location(Location::new(lat, 45.0).unwrap())
            .window(TimeWindow::new(now, now + Duration::hours(1)).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn clean_proposal_is_approved_and_visible() {
        let e = engine();
        let grant = proposal("radio-1", 300.0, 35.0);
        let id = grant.id;

        match e.submit_proposal(grant).unwrap() {
            SubmitOutcome::Approved { grant_id } => assert_eq!(grant_id, id),
            other => panic!("expected approval, got {other:?}"),
        }
        let active = e.active_grants(Utc::now()).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id);
    }

    #[test]
    fn protected_band_emission_is_denied_without_negotiation() {
        let e = engine();
        let mut grant = proposal("jammer-1", 95.0, 35.0);
        grant.action = ActionKind::Jamming;

        match e.submit_proposal(grant).unwrap() {
            SubmitOutcome::Denied { reasons, .. } => {
                assert!(!reasons.is_empty());
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert!(e.active_grants(Utc::now()).unwrap().is_empty());
        assert_eq!(e.denials().unwrap().len(), 1);
    }

    #[test]
    fn severe_cochannel_conflict_is_denied_with_alternatives() {
        let e = engine();
        e.submit_proposal(proposal("radio-1", 300.0, 35.0)).unwrap();

        // ~5 km away on the same frequency: severity above the deny line.
        match e.submit_proposal(proposal("radio-2", 300.0, 35.045)).unwrap() {
            SubmitOutcome::Denied {
                alternatives_mhz, ..
            } => {
                assert!(!alternatives_mhz.is_empty());
                for alt in &alternatives_mhz {
                    assert!((alt - 300.0).abs() > 5.0);
                }
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert!(!e.conflict_history().unwrap().is_empty());
    }

    #[test]
    fn moderate_conflict_opens_a_session_with_the_holder() {
        let e = engine();
        e.submit_proposal(proposal("radio-1", 300.0, 35.0)).unwrap();

        // 3 MHz offset ~40 km out: contested but below the deny line.
        let mut contender = proposal("radio-2", 303.0, 35.36);
        contender.power_dbm = 40.0;
        match e.submit_proposal(contender).unwrap() {
            SubmitOutcome::Negotiating { session_id, .. } => {
                assert_eq!(
                    e.coordinator().session_state(session_id).unwrap(),
                    SessionState::Active
                );
            }
            other => panic!("expected negotiation, got {other:?}"),
        }
    }

    /// Delegates to an in-memory store but reports the first commit as
    /// contested by a rival grant, as a racing writer would.
    struct ContestedOnceStore {
        inner: InMemoryAllocationStore,
        rival: Grant,
        contested: std::sync::atomic::AtomicBool,
    }

    impl AllocationStore for ContestedOnceStore {
        fn add(&self, grant: Grant) -> Result<(), crate::store::StorageError> {
            self.inner.add(grant)
        }

        fn get(&self, id: GrantId) -> Result<Option<Grant>, crate::store::StorageError> {
            self.inner.get(id)
        }

        fn get_active(&self, at: DateTime<Utc>) -> Result<Vec<Grant>, crate::store::StorageError> {
            self.inner.get_active(at)
        }

        fn get_by_frequency_range(
            &self,
            min_mhz: f64,
            max_mhz: f64,
            at: DateTime<Utc>,
        ) -> Result<Vec<Grant>, crate::store::StorageError> {
            self.inner.get_by_frequency_range(min_mhz, max_mhz, at)
        }

        fn get_overlapping(
            &self,
            window: &TimeWindow,
        ) -> Result<Vec<Grant>, crate::store::StorageError> {
            self.inner.get_overlapping(window)
        }

        fn get_by_participant(
            &self,
            owner: &ParticipantId,
        ) -> Result<Vec<Grant>, crate::store::StorageError> {
            self.inner.get_by_participant(owner)
        }

        fn commit_checked(
            &self,
            grant: Grant,
            check: &dyn Fn(&Grant, &[Grant]) -> Vec<Conflict>,
        ) -> Result<CommitOutcome, crate::store::StorageError> {
            if !self
                .contested
                .swap(true, std::sync::atomic::Ordering::SeqCst)
            {
                return Ok(CommitOutcome::Contested(check(
                    &grant,
                    &[self.rival.clone()],
                )));
            }
            self.inner.commit_checked(grant, check)
        }

        fn remove(&self, id: GrantId) -> Result<bool, crate::store::StorageError> {
            self.inner.remove(id)
        }

        fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, crate::store::StorageError> {
            self.inner.remove_expired(now)
        }
    }

    #[test]
    fn contested_commit_retries_once_the_contention_clears() {
        let rival = proposal("radio-9", 300.0, 35.0);
        let store = Arc::new(ContestedOnceStore {
            inner: InMemoryAllocationStore::new(),
            rival,
            contested: std::sync::atomic::AtomicBool::new(false),
        });
        let e = ArbiterEngine::new(
            ArbiterConfig::default(),
            store,
            Arc::new(InMemoryAuditStore::new()),
        );

        let grant = proposal("radio-1", 300.0, 35.0);
        let id = grant.id;
        match e.submit_proposal(grant).unwrap() {
            SubmitOutcome::Approved { grant_id } => assert_eq!(grant_id, id),
            other => panic!("expected approval once the contention cleared, got {other:?}"),
        }

        // The contested attempt left its conflicts on the audit record.
        assert!(!e.conflict_history().unwrap().is_empty());
        assert_eq!(e.active_grants(Utc::now()).unwrap().len(), 1);
    }

    #[test]
    fn expired_grants_leave_the_active_set() {
        let e = engine();
        let grant = proposal("radio-1", 300.0, 35.0);
        e.submit_proposal(grant).unwrap();

        let later = Utc::now() + Duration::hours(2);
        let report = e.run_maintenance(later).unwrap();
        assert_eq!(report.expired, 1);
        assert!(e.active_grants(later).unwrap().is_empty());
    }
}
