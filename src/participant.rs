//! The fixed participant seam.
//!
//! Requesters interact with the arbiter through grant submissions and
//! session messages; the coordinator pushes session lifecycle events back
//! through this trait. All methods default to no-ops so a handler only
//! implements the events it cares about.

use crate::grant::Grant;
use crate::negotiation::{Resolution, RoundOutcome, SessionId};

/// Callbacks delivered to a registered participant as its sessions advance.
///
/// Handlers run on the coordinator's caller thread and must not block;
/// replies go back through the coordinator, never from inside a callback.
pub trait Participant: Send + Sync {
    /// A session involving this participant opened (or it was joined to one).
    fn on_negotiation_opened(&self, _session: SessionId, _proposals: &[Grant]) {}

    /// A round closed; the next round is open unless the session resolved.
    fn on_round_closed(&self, _session: SessionId, _outcome: &RoundOutcome) {}

    /// The session reached a resolution.
    fn on_resolved(&self, _session: SessionId, _resolution: &Resolution) {}
}
