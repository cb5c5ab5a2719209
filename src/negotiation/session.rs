//! Per-session negotiation state machine.
//!
//! A session tracks the live proposal of each participant, collects one
//! reply per participant per round, and resolves either by convergence
//! (everyone accepted the same proposal) or, at the round limit, by the
//! automatic strategy ladder: priority override, then time-sharing, then
//! escalation. Escalated sessions resolve only through an explicit
//! override.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::config::{NegotiationConfig, SplitRule};
use crate::deconflict::{DeconflictionEngine, FrequencyBand};
use crate::envelope::MessageId;
use crate::error::{ArbResult, ExecutionError};
use crate::grant::{Grant, GrantId, ParticipantId};
use crate::time::TimeWindow;

use super::{
    Resolution, ResolutionKind, Round, RoundOutcome, RoundReply, SessionId, SessionState,
    SubmitAck,
};

/// State transition produced while applying a message or a tick.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A round closed; the next round opened unless the session resolved.
    RoundClosed(RoundOutcome),

    /// The session reached a resolution.
    Resolved,

    /// The session escalated to a human decision.
    Escalated {
        /// Why automatic resolution stopped.
        reason: String,
    },

    /// The session ended without a resolution.
    Deadlocked {
        /// Why the session was abandoned.
        reason: String,
    },
}

/// A bounded multi-round negotiation over contending proposals.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    state: SessionState,
    proposals: BTreeMap<ParticipantId, Grant>,
    withdrawn: BTreeSet<ParticipantId>,
    acceptances: BTreeMap<ParticipantId, GrantId>,
    contested_existing: BTreeSet<GrantId>,
    rounds: Vec<Round>,
    seen_messages: HashSet<MessageId>,
    resolution: Option<Resolution>,
    opened_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    max_rounds: u32,
    round_timeout: Duration,
    split_rule: SplitRule,
}

impl Session {
    /// Opens a session over the given live proposals, one per participant.
    /// Round 1 opens immediately.
    #[must_use]
    pub fn open(
        id: SessionId,
        proposals: Vec<Grant>,
        contested_existing: BTreeSet<GrantId>,
        now: DateTime<Utc>,
        config: &NegotiationConfig,
    ) -> Self {
        let round_timeout = Duration::seconds(config.round_timeout_secs);
        let proposals = proposals
            .into_iter()
            .map(|g| (g.owner.clone(), g))
            .collect();

        Self {
            id,
            state: SessionState::Active,
            proposals,
            withdrawn: BTreeSet::new(),
            acceptances: BTreeMap::new(),
            contested_existing,
            rounds: vec![Round::open(1, now, round_timeout)],
            seen_messages: HashSet::new(),
            resolution: None,
            opened_at: now,
            deadline: now + Duration::seconds(config.session_timeout_secs),
            max_rounds: config.max_rounds,
            round_timeout,
            split_rule: config.split_rule,
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// When the session opened.
    #[must_use]
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// The resolution, once one exists.
    #[must_use]
    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    /// Rounds so far, oldest first.
    #[must_use]
    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    /// Every participant ever admitted, withdrawn or not.
    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.proposals.keys().cloned().collect()
    }

    /// Participants still negotiating.
    #[must_use]
    pub fn active_participants(&self) -> Vec<ParticipantId> {
        self.proposals
            .keys()
            .filter(|p| !self.withdrawn.contains(*p))
            .cloned()
            .collect()
    }

    /// Live proposals of the active participants.
    #[must_use]
    pub fn live_proposals(&self) -> Vec<Grant> {
        self.proposals
            .iter()
            .filter(|(p, _)| !self.withdrawn.contains(*p))
            .map(|(_, g)| g.clone())
            .collect()
    }

    /// Committed grants this session is contesting.
    #[must_use]
    pub fn contested_existing(&self) -> &BTreeSet<GrantId> {
        &self.contested_existing
    }

    /// Whether the session owns the given contested grant or live proposal.
    #[must_use]
    pub fn references_grant(&self, id: GrantId) -> bool {
        self.contested_existing.contains(&id) || self.proposals.values().any(|g| g.id == id)
    }

    /// Admits a late participant whose proposal contends transitively with
    /// this session's neighborhood. The current round then also waits for
    /// their reply.
    ///
    /// # Errors
    ///
    /// Fails if the session is not active.
    pub fn join(&mut self, grant: Grant, contested: &BTreeSet<GrantId>) -> ArbResult<()> {
        self.ensure_active()?;
        self.withdrawn.remove(&grant.owner);
        self.proposals.insert(grant.owner.clone(), grant);
        self.contested_existing.extend(contested.iter().copied());
        Ok(())
    }

    /// Applies a counter-proposal: the sender's live proposal is replaced
    /// for the next convergence check. Within an open round the latest
    /// reply from a sender supersedes their earlier one; a redelivered
    /// message ID is acknowledged without being applied.
    ///
    /// # Errors
    ///
    /// Fails if the session is not active or the sender is not an active
    /// participant.
    pub fn submit_counter(
        &mut self,
        sender: &ParticipantId,
        message_id: MessageId,
        mut grant: Grant,
        now: DateTime<Utc>,
        decon: &DeconflictionEngine,
    ) -> ArbResult<(SubmitAck, Vec<SessionEvent>)> {
        self.ensure_active()?;
        self.ensure_participant(sender)?;
        if !self.seen_messages.insert(message_id) {
            return Ok((SubmitAck::Duplicate, Vec::new()));
        }

        grant.owner = sender.clone();
        self.acceptances.remove(sender);
        self.proposals.insert(sender.clone(), grant.clone());
        self.record_reply(sender, RoundReply::Counter(grant));

        let events = self.try_close_round(now, decon);
        Ok((SubmitAck::Recorded, events))
    }

    /// Applies an acceptance of a live proposal.
    ///
    /// # Errors
    ///
    /// Fails if the session is not active, the sender is not an active
    /// participant, or `proposal` is not a live proposal.
    pub fn accept(
        &mut self,
        sender: &ParticipantId,
        message_id: MessageId,
        proposal: GrantId,
        now: DateTime<Utc>,
        decon: &DeconflictionEngine,
    ) -> ArbResult<(SubmitAck, Vec<SessionEvent>)> {
        self.ensure_active()?;
        self.ensure_participant(sender)?;
        if !self.live_proposal_ids().contains(&proposal) {
            return Err(ExecutionError::GrantNotFound { id: proposal }.into());
        }
        if !self.seen_messages.insert(message_id) {
            return Ok((SubmitAck::Duplicate, Vec::new()));
        }

        self.acceptances.insert(sender.clone(), proposal);
        self.record_reply(sender, RoundReply::Accept(proposal));

        let events = self.try_close_round(now, decon);
        Ok((SubmitAck::Recorded, events))
    }

    /// Withdraws a participant from this and all future rounds. If a single
    /// contender remains the session resolves in their favor; if none
    /// remain it deadlocks.
    ///
    /// # Errors
    ///
    /// Fails if the session is not active or the sender is not an active
    /// participant.
    pub fn withdraw(
        &mut self,
        sender: &ParticipantId,
        now: DateTime<Utc>,
        decon: &DeconflictionEngine,
    ) -> ArbResult<Vec<SessionEvent>> {
        self.ensure_active()?;
        self.ensure_participant(sender)?;
        self.withdrawn.insert(sender.clone());

        let remaining = self.live_proposals();
        let events = match remaining.len() {
            0 => {
                self.state = SessionState::Deadlocked;
                vec![SessionEvent::Deadlocked {
                    reason: "every participant withdrew".to_string(),
                }]
            }
            1 => match remaining.into_iter().next() {
                Some(winner) => {
                    let denied = self.withdrawn_proposal_ids();
                    self.resolve(Resolution {
                        kind: ResolutionKind::Agreement,
                        approved: vec![winner],
                        denied,
                        alternatives_mhz: Vec::new(),
                        note: "contention withdrawn; a single proposal remains".to_string(),
                    })
                }
                None => Vec::new(),
            },
            _ => self.try_close_round(now, decon),
        };
        Ok(events)
    }

    /// Advances deadlines. A passed round deadline closes the round with
    /// non-responders counted as "no counter-proposal"; a passed session
    /// deadline forces escalation.
    pub fn tick(&mut self, now: DateTime<Utc>, decon: &DeconflictionEngine) -> Vec<SessionEvent> {
        if self.state != SessionState::Active {
            return Vec::new();
        }
        if now >= self.deadline {
            return self.escalate("session deadline elapsed without a resolution");
        }
        let round_expired = self
            .rounds
            .last()
            .is_some_and(|r| !r.is_closed() && now >= r.deadline);
        if round_expired {
            return self.close_round(now, decon);
        }
        Vec::new()
    }

    /// Applies a human override to an escalated session.
    ///
    /// # Errors
    ///
    /// Fails unless the session is escalated.
    pub fn submit_override(&mut self, resolution: Resolution) -> ArbResult<Vec<SessionEvent>> {
        if self.state != SessionState::Escalated {
            return Err(ExecutionError::SessionNotEscalated { id: self.id }.into());
        }
        self.state = SessionState::Resolved;
        self.resolution = Some(Resolution {
            kind: ResolutionKind::ManualOverride,
            ..resolution
        });
        Ok(vec![SessionEvent::Resolved])
    }

    /// Abandons the session without a resolution.
    ///
    /// # Errors
    ///
    /// Fails if the session already reached a terminal state.
    pub fn cancel(&mut self, reason: impl Into<String>) -> ArbResult<Vec<SessionEvent>> {
        if self.state.is_terminal() {
            return Err(ExecutionError::SessionNotActive {
                id: self.id,
                state: self.state.to_string(),
            }
            .into());
        }
        let reason = reason.into();
        self.state = SessionState::Deadlocked;
        Ok(vec![SessionEvent::Deadlocked { reason }])
    }

    fn ensure_active(&self) -> ArbResult<()> {
        if self.state == SessionState::Active {
            Ok(())
        } else {
            Err(ExecutionError::SessionNotActive {
                id: self.id,
                state: self.state.to_string(),
            }
            .into())
        }
    }

    fn ensure_participant(&self, sender: &ParticipantId) -> ArbResult<()> {
        if self.proposals.contains_key(sender) && !self.withdrawn.contains(sender) {
            Ok(())
        } else {
            Err(ExecutionError::NotAParticipant {
                session: self.id,
                participant: sender.clone(),
            }
            .into())
        }
    }

    fn live_proposal_ids(&self) -> Vec<GrantId> {
        self.live_proposals().iter().map(|g| g.id).collect()
    }

    fn withdrawn_proposal_ids(&self) -> Vec<GrantId> {
        self.proposals
            .iter()
            .filter(|(p, _)| self.withdrawn.contains(*p))
            .map(|(_, g)| g.id)
            .collect()
    }

    fn record_reply(&mut self, sender: &ParticipantId, reply: RoundReply) {
        if let Some(round) = self.rounds.last_mut() {
            if !round.is_closed() {
                round.replies.insert(sender.clone(), reply);
            }
        }
    }

    /// Closes the current round early once every active participant has
    /// replied.
    fn try_close_round(
        &mut self,
        now: DateTime<Utc>,
        decon: &DeconflictionEngine,
    ) -> Vec<SessionEvent> {
        let all_replied = match self.rounds.last() {
            Some(round) if !round.is_closed() => self
                .active_participants()
                .iter()
                .all(|p| round.replies.contains_key(p)),
            _ => false,
        };
        if all_replied {
            self.close_round(now, decon)
        } else {
            Vec::new()
        }
    }

    fn close_round(&mut self, now: DateTime<Utc>, decon: &DeconflictionEngine) -> Vec<SessionEvent> {
        let target = self.convergence_target();
        let (number, replies) = match self.rounds.last_mut() {
            Some(round) => {
                round.closed_at = Some(now);
                (round.number, round.replies.len())
            }
            None => return Vec::new(),
        };

        let mut events = vec![SessionEvent::RoundClosed(RoundOutcome {
            number,
            replies,
            converged: target.is_some(),
        })];

        if let Some(winner_id) = target {
            events.extend(self.resolve_agreement(winner_id));
        } else if number >= self.max_rounds {
            events.extend(self.auto_resolve(decon));
        } else {
            self.rounds
                .push(Round::open(number + 1, now, self.round_timeout));
        }
        events
    }

    /// The proposal everyone converged on, if any. A participant implicitly
    /// accepts their own live proposal.
    fn convergence_target(&self) -> Option<GrantId> {
        let active = self.active_participants();
        if active.len() < 2 {
            return None;
        }
        self.live_proposals().iter().map(|g| g.id).find(|candidate| {
            active.iter().all(|p| {
                self.proposals.get(p).is_some_and(|g| g.id == *candidate)
                    || self.acceptances.get(p) == Some(candidate)
            })
        })
    }

    fn resolve_agreement(&mut self, winner_id: GrantId) -> Vec<SessionEvent> {
        let approved: Vec<Grant> = self
            .live_proposals()
            .into_iter()
            .filter(|g| g.id == winner_id)
            .collect();
        let denied: Vec<GrantId> = self
            .live_proposal_ids()
            .into_iter()
            .filter(|id| *id != winner_id)
            .collect();
        self.resolve(Resolution {
            kind: ResolutionKind::Agreement,
            approved,
            denied,
            alternatives_mhz: Vec::new(),
            note: "all active participants accepted the same proposal".to_string(),
        })
    }

    /// Strategy ladder applied at the round limit: priority override, then
    /// time-sharing, then escalation.
    fn auto_resolve(&mut self, decon: &DeconflictionEngine) -> Vec<SessionEvent> {
        let live = self.live_proposals();

        // Priority override applies only to a strictly highest priority.
        if let Some(max) = live.iter().map(|g| g.priority).max() {
            let mut at_max = live.iter().filter(|g| g.priority == max);
            if let (Some(winner), None) = (at_max.next(), at_max.next()) {
                let winner = winner.clone();
                let losers: Vec<&Grant> = live.iter().filter(|g| g.id != winner.id).collect();
                let mut alternatives = Vec::new();
                for loser in &losers {
                    for alt in decon.suggest_alternatives(
                        FrequencyBand::around(loser.frequency_mhz()),
                        &[winner.frequency_mhz()],
                    ) {
                        if !alternatives.iter().any(|a: &f64| (a - alt).abs() < 1e-9) {
                            alternatives.push(alt);
                        }
                    }
                }
                let denied = losers.iter().map(|g| g.id).collect();
                let note = format!(
                    "round limit reached; {} priority {} overrides",
                    winner.owner, winner.priority
                );
                return self.resolve(Resolution {
                    kind: ResolutionKind::PriorityOverride,
                    approved: vec![winner],
                    denied,
                    alternatives_mhz: alternatives,
                    note,
                });
            }
        }

        // Time-sharing applies to exactly two equal-priority contenders.
        if live.len() == 2 {
            if let Some(resolution) = self.time_share(&live[0], &live[1]) {
                return self.resolve(resolution);
            }
        }

        self.escalate("round limit reached with no applicable automatic strategy")
    }

    /// Splits the contested window between two grants. The earlier-starting
    /// grant keeps the head of the contested region; the split point honors
    /// the configured rule. Returns `None` when no valid split exists.
    fn time_share(&self, a: &Grant, b: &Grant) -> Option<Resolution> {
        let (first, second) = if a.window.start <= b.window.start {
            (a, b)
        } else {
            (b, a)
        };
        let contested = first.window.intersection(&second.window)?;
        let contested_secs = contested.duration().num_seconds();

        let share = match self.split_rule {
            SplitRule::Equal => 0.5,
            SplitRule::Proportional => {
                let da = first.window.duration().num_seconds() as f64;
                let db = second.window.duration().num_seconds() as f64;
                if da + db <= 0.0 {
                    return None;
                }
                da / (da + db)
            }
        };

        let split_secs = (contested_secs as f64 * share).round() as i64;
        if split_secs <= 0 || split_secs >= contested_secs {
            return None;
        }
        let split_at = contested.start + Duration::seconds(split_secs);

        let first_window = TimeWindow::new(first.window.start, split_at).ok()?;
        let second_window = TimeWindow::new(split_at, second.window.end).ok()?;

        for (grant, window) in [(first, &first_window), (second, &second_window)] {
            if let Some(min_secs) = grant.min_duration_secs {
                if window.duration().num_seconds() < min_secs {
                    return None;
                }
            }
        }

        let mut first_grant = first.clone();
        first_grant.window = first_window;
        let mut second_grant = second.clone();
        second_grant.window = second_window;

        Some(Resolution {
            kind: ResolutionKind::TimeShare,
            approved: vec![first_grant, second_grant],
            denied: Vec::new(),
            alternatives_mhz: Vec::new(),
            note: format!(
                "round limit reached; contested window split at {split_at} ({:?} rule)",
                self.split_rule
            ),
        })
    }

    fn resolve(&mut self, resolution: Resolution) -> Vec<SessionEvent> {
        self.state = SessionState::Resolved;
        self.resolution = Some(resolution);
        vec![SessionEvent::Resolved]
    }

    fn escalate(&mut self, reason: impl Into<String>) -> Vec<SessionEvent> {
        self.state = SessionState::Escalated;
        vec![SessionEvent::Escalated {
            reason: reason.into(),
        }]
    }
}
