//! Session coordinator: the bounded registry and event dispatch.
//!
//! Owns every active session behind one `RwLock`, enforces the registry
//! capacity, routes messages to sessions, and drives deadlines through
//! `tick`. Participant callbacks are dispatched after the registry lock is
//! released.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::NegotiationConfig;
use crate::deconflict::DeconflictionEngine;
use crate::envelope::MessageId;
use crate::error::{ArbError, ArbResult, ExecutionError};
use crate::grant::{Grant, GrantId, ParticipantId};
use crate::participant::Participant;

use super::session::{Session, SessionEvent};
use super::{Resolution, RoundOutcome, SessionId, SessionState, SubmitAck};

/// A session that left the active registry, ready for finalization.
#[derive(Debug, Clone)]
pub struct FinishedSession {
    /// Session identifier.
    pub id: SessionId,

    /// Terminal state reached.
    pub state: SessionState,

    /// The resolution, when one was reached.
    pub resolution: Option<Resolution>,

    /// Every participant that was admitted to the session.
    pub participants: Vec<ParticipantId>,

    /// Committed grants the session was contesting.
    pub contested_existing: Vec<GrantId>,

    /// Human-readable summary for the audit record.
    pub summary: String,
}

/// A snapshot of a session awaiting a human override.
#[derive(Debug, Clone)]
pub struct EscalationSnapshot {
    /// Session identifier.
    pub session_id: SessionId,

    /// Live proposals at the time of escalation.
    pub proposals: Vec<Grant>,

    /// When the session opened.
    pub opened_at: DateTime<Utc>,
}

struct Registry {
    sessions: HashMap<SessionId, Session>,
    finished: Vec<FinishedSession>,
}

enum Notification {
    Opened(Vec<Grant>),
    RoundClosed(RoundOutcome),
    Resolved(Resolution),
}

/// Coordinates every negotiation session in the system.
pub struct NegotiationCoordinator {
    config: NegotiationConfig,
    decon: DeconflictionEngine,
    registry: RwLock<Registry>,
    participants: RwLock<HashMap<ParticipantId, Arc<dyn Participant>>>,
}

impl NegotiationCoordinator {
    /// Creates a coordinator with an empty registry.
    #[must_use]
    pub fn new(config: NegotiationConfig, decon: DeconflictionEngine) -> Self {
        Self {
            config,
            decon,
            registry: RwLock::new(Registry {
                sessions: HashMap::new(),
                finished: Vec::new(),
            }),
            participants: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a callback handler for a participant. Unregistered
    /// participants can still negotiate; they just receive no callbacks.
    ///
    /// # Errors
    ///
    /// Fails if the handler table lock is poisoned.
    pub fn register_participant(
        &self,
        id: ParticipantId,
        handler: Arc<dyn Participant>,
    ) -> ArbResult<()> {
        self.participants
            .write()
            .map_err(|_| ArbError::internal("participant table lock poisoned"))?
            .insert(id, handler);
        Ok(())
    }

    /// Number of sessions currently in the registry (active or escalated).
    ///
    /// # Errors
    ///
    /// Fails if the registry lock is poisoned.
    pub fn len(&self) -> ArbResult<usize> {
        Ok(self.read_registry()?.sessions.len())
    }

    /// Whether the registry is empty.
    ///
    /// # Errors
    ///
    /// Fails if the registry lock is poisoned.
    pub fn is_empty(&self) -> ArbResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Opens a session over at least two contending proposals and notifies
    /// every implicated participant.
    ///
    /// # Errors
    ///
    /// Fails if the registry is at capacity or fewer than two proposals are
    /// given.
    pub fn open_session(
        &self,
        proposals: Vec<Grant>,
        contested_existing: BTreeSet<GrantId>,
        now: DateTime<Utc>,
    ) -> ArbResult<SessionId> {
        if proposals.len() < 2 {
            return Err(ArbError::internal(
                "a negotiation session requires at least two proposals",
            ));
        }

        let id = SessionId::new();
        let notify = proposals.clone();
        let recipients: Vec<ParticipantId> = proposals.iter().map(|g| g.owner.clone()).collect();

        {
            let mut registry = self.write_registry()?;
            if registry.sessions.len() >= self.config.registry_capacity {
                warn!(
                    capacity = self.config.registry_capacity,
                    "session registry full; rejecting negotiation"
                );
                return Err(ExecutionError::RegistryFull {
                    capacity: self.config.registry_capacity,
                }
                .into());
            }
            let session = Session::open(id, proposals, contested_existing, now, &self.config);
            registry.sessions.insert(id, session);
        }

        info!(session = %id, participants = recipients.len(), "negotiation session opened");
        self.dispatch(id, &recipients, &[Notification::Opened(notify)]);
        Ok(id)
    }

    /// Finds an active session contesting any of the given grants, used to
    /// group transitive contention into one session.
    ///
    /// # Errors
    ///
    /// Fails if the registry lock is poisoned.
    pub fn find_session_referencing(&self, grants: &[GrantId]) -> ArbResult<Option<SessionId>> {
        let registry = self.read_registry()?;
        Ok(registry
            .sessions
            .values()
            .find(|s| {
                s.state() == SessionState::Active
                    && grants.iter().any(|g| s.references_grant(*g))
            })
            .map(Session::id))
    }

    /// Admits a late proposal into an existing session.
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown or no longer active.
    pub fn join_session(
        &self,
        id: SessionId,
        grant: Grant,
        contested_existing: &BTreeSet<GrantId>,
    ) -> ArbResult<()> {
        let (joiner, live) = {
            let mut registry = self.write_registry()?;
            let session = registry
                .sessions
                .get_mut(&id)
                .ok_or(ExecutionError::SessionNotFound { id })?;
            let joiner = grant.owner.clone();
            session.join(grant, contested_existing)?;
            (joiner, session.live_proposals())
        };

        info!(session = %id, participant = %joiner, "participant joined session");
        self.dispatch(id, &[joiner], &[Notification::Opened(live)]);
        Ok(())
    }

    /// Routes a counter-proposal to its session.
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown, not active, or the sender is not a
    /// participant.
    pub fn submit_counter(
        &self,
        id: SessionId,
        sender: &ParticipantId,
        message_id: MessageId,
        grant: Grant,
        now: DateTime<Utc>,
    ) -> ArbResult<SubmitAck> {
        self.apply(id, |session, decon| {
            session.submit_counter(sender, message_id, grant.clone(), now, decon)
        })
    }

    /// Routes an acceptance to its session.
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown, not active, the sender is not a
    /// participant, or the proposal is not live.
    pub fn accept(
        &self,
        id: SessionId,
        sender: &ParticipantId,
        message_id: MessageId,
        proposal: GrantId,
        now: DateTime<Utc>,
    ) -> ArbResult<SubmitAck> {
        self.apply(id, |session, decon| {
            session.accept(sender, message_id, proposal, now, decon)
        })
    }

    /// Withdraws a participant from a session.
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown or the sender is not a participant.
    pub fn withdraw(
        &self,
        id: SessionId,
        sender: &ParticipantId,
        now: DateTime<Utc>,
    ) -> ArbResult<()> {
        self.apply(id, |session, decon| {
            session
                .withdraw(sender, now, decon)
                .map(|events| ((), events))
        })
    }

    /// Applies a human override to an escalated session.
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown or not escalated.
    pub fn submit_override(&self, id: SessionId, resolution: Resolution) -> ArbResult<()> {
        self.apply(id, |session, _| {
            session.submit_override(resolution.clone()).map(|e| ((), e))
        })
    }

    /// Abandons a session without a resolution.
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown or already terminal.
    pub fn cancel_session(&self, id: SessionId, reason: &str) -> ArbResult<()> {
        self.apply(id, |session, _| session.cancel(reason).map(|e| ((), e)))
    }

    /// Drives round and session deadlines across every session. Returns the
    /// sessions that changed state.
    ///
    /// # Errors
    ///
    /// Fails if the registry lock is poisoned.
    pub fn tick(&self, now: DateTime<Utc>) -> ArbResult<Vec<SessionId>> {
        let mut changed = Vec::new();
        let mut dispatches = Vec::new();
        {
            let mut registry = self.write_registry()?;
            let ids: Vec<SessionId> = registry.sessions.keys().copied().collect();
            for id in ids {
                let Some(session) = registry.sessions.get_mut(&id) else {
                    continue;
                };
                let events = session.tick(now, &self.decon);
                if events.is_empty() {
                    continue;
                }
                changed.push(id);
                let recipients = session.participants();
                let notifications = Self::notifications_for(session, &events);
                Self::retire_if_terminal(&mut registry, id, &events);
                dispatches.push((id, recipients, notifications));
            }
        }

        for (id, recipients, notifications) in dispatches {
            self.dispatch(id, &recipients, &notifications);
        }
        Ok(changed)
    }

    /// Drains sessions that reached a terminal state since the last call.
    ///
    /// # Errors
    ///
    /// Fails if the registry lock is poisoned.
    pub fn take_finished(&self) -> ArbResult<Vec<FinishedSession>> {
        Ok(std::mem::take(&mut self.write_registry()?.finished))
    }

    /// Snapshots of every session awaiting a human override.
    ///
    /// # Errors
    ///
    /// Fails if the registry lock is poisoned.
    pub fn pending_escalations(&self) -> ArbResult<Vec<EscalationSnapshot>> {
        let registry = self.read_registry()?;
        let mut pending: Vec<EscalationSnapshot> = registry
            .sessions
            .values()
            .filter(|s| s.state() == SessionState::Escalated)
            .map(|s| EscalationSnapshot {
                session_id: s.id(),
                proposals: s.live_proposals(),
                opened_at: s.opened_at(),
            })
            .collect();
        pending.sort_by_key(|s| s.opened_at);
        Ok(pending)
    }

    /// Current state of a session still in the registry.
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown (finalized sessions leave the
    /// registry).
    pub fn session_state(&self, id: SessionId) -> ArbResult<SessionState> {
        let registry = self.read_registry()?;
        registry
            .sessions
            .get(&id)
            .map(Session::state)
            .ok_or_else(|| ExecutionError::SessionNotFound { id }.into())
    }

    /// Applies a closure to one session, retires it if it became terminal,
    /// and dispatches the produced notifications outside the lock.
    fn apply<T>(
        &self,
        id: SessionId,
        op: impl FnOnce(&mut Session, &DeconflictionEngine) -> ArbResult<(T, Vec<SessionEvent>)>,
    ) -> ArbResult<T> {
        let (value, recipients, notifications) = {
            let mut registry = self.write_registry()?;
            let session = registry
                .sessions
                .get_mut(&id)
                .ok_or(ExecutionError::SessionNotFound { id })?;
            let (value, events) = op(session, &self.decon)?;
            let recipients = session.participants();
            let notifications = Self::notifications_for(session, &events);
            Self::retire_if_terminal(&mut registry, id, &events);
            (value, recipients, notifications)
        };

        self.dispatch(id, &recipients, &notifications);
        Ok(value)
    }

    fn notifications_for(session: &Session, events: &[SessionEvent]) -> Vec<Notification> {
        let mut out = Vec::new();
        for event in events {
            match event {
                SessionEvent::RoundClosed(outcome) => {
                    debug!(
                        session = %session.id(),
                        round = outcome.number,
                        replies = outcome.replies,
                        converged = outcome.converged,
                        "round closed"
                    );
                    out.push(Notification::RoundClosed(outcome.clone()));
                }
                SessionEvent::Resolved => {
                    if let Some(resolution) = session.resolution() {
                        info!(
                            session = %session.id(),
                            kind = %resolution.kind,
                            "session resolved"
                        );
                        out.push(Notification::Resolved(resolution.clone()));
                    }
                }
                SessionEvent::Escalated { reason } => {
                    warn!(session = %session.id(), reason = %reason, "session escalated");
                }
                SessionEvent::Deadlocked { reason } => {
                    warn!(session = %session.id(), reason = %reason, "session deadlocked");
                }
            }
        }
        out
    }

    /// Moves a terminal session out of the bounded registry into the
    /// finished queue, freeing its capacity slot.
    fn retire_if_terminal(registry: &mut Registry, id: SessionId, events: &[SessionEvent]) {
        let terminal = registry
            .sessions
            .get(&id)
            .is_some_and(|s| s.state().is_terminal());
        if !terminal {
            return;
        }
        if let Some(session) = registry.sessions.remove(&id) {
            let summary = session
                .resolution()
                .map(|r| r.note.clone())
                .or_else(|| {
                    events.iter().find_map(|e| match e {
                        SessionEvent::Deadlocked { reason } => Some(reason.clone()),
                        _ => None,
                    })
                })
                .unwrap_or_default();
            registry.finished.push(FinishedSession {
                id,
                state: session.state(),
                resolution: session.resolution().cloned(),
                participants: session.participants(),
                contested_existing: session.contested_existing().iter().copied().collect(),
                summary,
            });
        }
    }

    fn dispatch(&self, id: SessionId, recipients: &[ParticipantId], notifications: &[Notification]) {
        let handlers = match self.participants.read() {
            Ok(table) => recipients
                .iter()
                .filter_map(|p| table.get(p).cloned())
                .collect::<Vec<_>>(),
            Err(_) => return,
        };
        for notification in notifications {
            for handler in &handlers {
                match notification {
                    Notification::Opened(proposals) => {
                        handler.on_negotiation_opened(id, proposals);
                    }
                    Notification::RoundClosed(outcome) => handler.on_round_closed(id, outcome),
                    Notification::Resolved(resolution) => handler.on_resolved(id, resolution),
                }
            }
        }
    }

    fn read_registry(&self) -> ArbResult<std::sync::RwLockReadGuard<'_, Registry>> {
        self.registry
            .read()
            .map_err(|_| ArbError::internal("session registry lock poisoned"))
    }

    fn write_registry(&self) -> ArbResult<std::sync::RwLockWriteGuard<'_, Registry>> {
        self.registry
            .write()
            .map_err(|_| ArbError::internal("session registry lock poisoned"))
    }
}
