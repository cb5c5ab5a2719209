//! Multi-round negotiation: sessions, rounds, and the coordinator.
//!
//! A session groups contending proposals and advances through bounded
//! rounds until the participants converge, an automatic strategy resolves
//! the contention, or the session escalates to a human decision.

mod coordinator;
mod session;

pub use coordinator::{EscalationSnapshot, FinishedSession, NegotiationCoordinator};
pub use session::{Session, SessionEvent};

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::grant::{Grant, GrantId, ParticipantId};

/// Unique identifier for a negotiation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a negotiation session.
///
/// `Active` is the only non-terminal state. `Escalated` sessions can still
/// reach `Resolved`, but only through an explicit override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Rounds are in progress.
    Active,

    /// A resolution was reached; terminal.
    Resolved,

    /// Abandoned without a resolution; terminal.
    Deadlocked,

    /// Awaiting a human override.
    Escalated,
}

impl SessionState {
    /// Whether no further messages are accepted.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Deadlocked)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Resolved => write!(f, "RESOLVED"),
            Self::Deadlocked => write!(f, "DEADLOCKED"),
            Self::Escalated => write!(f, "ESCALATED"),
        }
    }
}

/// A participant's reply within a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RoundReply {
    /// Replace the sender's live proposal with revised parameters.
    Counter(Grant),

    /// Accept the referenced live proposal.
    Accept(GrantId),
}

/// A single negotiation round.
///
/// Each active participant may reply at most once per round. The round
/// closes when every active participant has replied or the round deadline
/// passes; non-response counts as "no counter-proposal".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    /// 1-based round number.
    pub number: u32,

    /// When the round opened.
    pub opened_at: DateTime<Utc>,

    /// When the round closes regardless of replies.
    pub deadline: DateTime<Utc>,

    /// Replies received so far, one per participant.
    pub replies: BTreeMap<ParticipantId, RoundReply>,

    /// Set when the round closes.
    pub closed_at: Option<DateTime<Utc>>,
}

impl Round {
    pub(crate) fn open(number: u32, now: DateTime<Utc>, timeout: chrono::Duration) -> Self {
        Self {
            number,
            opened_at: now,
            deadline: now + timeout,
            replies: BTreeMap::new(),
            closed_at: None,
        }
    }

    /// Whether the round has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// How a resolution was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionKind {
    /// Every active participant accepted the same live proposal.
    Agreement,

    /// The strictly highest-priority proposal won at the round limit.
    PriorityOverride,

    /// The contested window was split between two participants.
    TimeShare,

    /// A human decision resolved an escalated session.
    ManualOverride,
}

impl fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agreement => write!(f, "AGREEMENT"),
            Self::PriorityOverride => write!(f, "PRIORITY_OVERRIDE"),
            Self::TimeShare => write!(f, "TIME_SHARE"),
            Self::ManualOverride => write!(f, "MANUAL_OVERRIDE"),
        }
    }
}

/// The outcome of a resolved session.
///
/// `approved` grants still pass a final compliance and conflict check
/// before commit; a resolution is a decision, not a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    /// How the resolution was reached.
    pub kind: ResolutionKind,

    /// Grants to commit, with any negotiated parameter adjustments applied.
    pub approved: Vec<Grant>,

    /// Proposals denied by the resolution.
    pub denied: Vec<GrantId>,

    /// Alternative center frequencies offered to denied participants, MHz.
    pub alternatives_mhz: Vec<f64>,

    /// Human-readable summary.
    pub note: String,
}

/// Summary of a closed round, delivered to participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundOutcome {
    /// The closed round's number.
    pub number: u32,

    /// How many replies were received before closing.
    pub replies: usize,

    /// Whether the round ended in convergence.
    pub converged: bool,
}

/// Acknowledgement of a round message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAck {
    /// The message was applied.
    Recorded,

    /// The message ID was already seen; nothing changed.
    Duplicate,
}
