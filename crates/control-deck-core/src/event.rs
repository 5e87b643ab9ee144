//! Events delivered through the bus.

use serde::{Deserialize, Serialize};

use crate::session::{Role, SessionSnapshot};

/// Which roles receive a broadcast event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every subscriber.
    All,
    /// Dashboards only.
    Observers,
    /// Agents only.
    Agents,
}

impl Audience {
    /// Whether a subscriber with `role` belongs to this audience.
    #[must_use]
    pub fn includes(self, role: Role) -> bool {
        match self {
            Self::All => true,
            Self::Observers => role == Role::Observer,
            Self::Agents => role == Role::Agent,
        }
    }
}

/// Payload carried by the event bus.
///
/// Broadcast events are filtered by [`Audience`]; the remaining variants are
/// only ever sent directly to a single recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The live roster changed; carries a full ordered snapshot.
    RosterChanged { sessions: Vec<SessionSnapshot> },
    /// Operator command for the receiving agent.
    Command { payload: String },
    /// Operator asked the receiving agent for its file listing.
    FileRequest,
    /// The receiving session is being disconnected by the server.
    Disconnect,
}

impl Event {
    /// Broadcast audience for this event.
    #[must_use]
    pub fn audience(&self) -> Audience {
        match self {
            Self::RosterChanged { .. } => Audience::Observers,
            Self::Command { .. } | Self::FileRequest | Self::Disconnect => Audience::All,
        }
    }
}
