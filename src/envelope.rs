//! Message envelope for negotiation traffic.
//!
//! Every inbound negotiation message carries a unique `MessageId`; the
//! session keeps a seen-set so redelivered messages are acknowledged
//! without being applied twice.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::grant::{Grant, GrantId, ParticipantId};
use crate::negotiation::{Resolution, SessionId};

/// Unique identifier for a message. Idempotence key: a session applies a
/// given message ID at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a message is about: a negotiation session or a standalone grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Addressed to a negotiation session.
    Session(SessionId),

    /// Addressed to a grant outside any session (submission, cancellation).
    Grant(GrantId),
}

/// Message kind, determining how the payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeKind {
    /// A counter-proposal within a session round.
    Counter,

    /// Acceptance of a live proposal within a session round.
    Accept,

    /// Withdrawal from a session.
    Withdraw,

    /// A human override for an escalated session.
    Override,
}

/// Payload of a [`EnvelopeKind::Counter`] message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterPayload {
    /// The revised grant parameters offered by the sender.
    pub grant: Grant,
}

/// Payload of an [`EnvelopeKind::Accept`] message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptPayload {
    /// The live proposal being accepted.
    pub proposal: GrantId,
}

/// Payload of an [`EnvelopeKind::Override`] message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverridePayload {
    /// The imposed resolution.
    pub resolution: Resolution,
}

/// A uniquely identified, timestamped negotiation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// What the message addresses.
    pub scope: Scope,

    /// Sending participant.
    pub sender: ParticipantId,

    /// Message kind.
    pub kind: EnvelopeKind,

    /// Kind-specific payload.
    pub payload: serde_json::Value,

    /// When the message was created.
    pub timestamp: DateTime<Utc>,

    /// Idempotence key.
    pub message_id: MessageId,
}

impl Envelope {
    /// Creates an envelope with a fresh message ID and the current time.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload cannot be encoded.
    pub fn new<P: Serialize>(
        scope: Scope,
        sender: ParticipantId,
        kind: EnvelopeKind,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            scope,
            sender,
            kind,
            payload: serde_json::to_value(payload)?,
            timestamp: Utc::now(),
            message_id: MessageId::new(),
        })
    }

    /// Decodes the payload as the given type.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the payload does not match.
    pub fn decode<P: for<'de> Deserialize<'de>>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
