//! Session identity and lifecycle state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::now_millis;

/// Session identifier, assigned by the gateway at connect time.
pub type SessionId = Uuid;

/// What kind of peer a session is.
///
/// Agents are command targets; observers are dashboards watching the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Remote machine that receives commands and file requests.
    Agent,
    /// Dashboard watching roster changes.
    Observer,
}

/// Session lifecycle state.
///
/// Transitions are `Connecting` → `Active` → `Disconnected` only.
/// `Disconnected` is terminal; a record is never mutated after reaching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Registered but not yet serving frames.
    Connecting,
    /// Fully connected and subscribed.
    Active,
    /// Removed from the live registry.
    Disconnected,
}

/// Canonical record for one connected peer.
///
/// Owned exclusively by the registry; everything outside the registry sees
/// only [`SessionSnapshot`] copies.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    id: SessionId,
    role: Role,
    display_name: String,
    remote_address: String,
    connected_at: i64,
    last_heartbeat_at: Option<i64>,
    status: SessionStatus,
}

impl SessionRecord {
    /// Create a record in `Connecting` state with a derived display name.
    #[must_use]
    pub fn new(id: SessionId, role: Role, remote_address: String) -> Self {
        let hex = id.simple().to_string();
        Self {
            id,
            role,
            display_name: format!("client-{}", &hex[..8]),
            remote_address,
            connected_at: now_millis(),
            last_heartbeat_at: None,
            status: SessionStatus::Connecting,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Last heartbeat, falling back to connect time for sessions that have
    /// never sent one.
    #[must_use]
    pub fn last_seen(&self) -> i64 {
        self.last_heartbeat_at.unwrap_or(self.connected_at)
    }

    /// Transition to `Active`. Caller must have verified the record is in
    /// `Connecting` state.
    pub fn activate(&mut self) {
        self.status = SessionStatus::Active;
    }

    /// Record a heartbeat, optionally renaming the session. Returns the
    /// recorded timestamp.
    pub fn touch(&mut self, display_name: Option<&str>) -> i64 {
        let now = now_millis();
        self.last_heartbeat_at = Some(now);
        if let Some(name) = display_name {
            self.display_name = name.to_string();
        }
        now
    }

    /// Mark the record `Disconnected`. Terminal.
    pub fn mark_disconnected(&mut self) {
        self.status = SessionStatus::Disconnected;
    }

    /// Immutable point-in-time copy for callers outside the registry.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            role: self.role,
            display_name: self.display_name.clone(),
            remote_address: self.remote_address.clone(),
            connected_at: self.connected_at,
            last_heartbeat_at: self.last_heartbeat_at,
            status: self.status,
        }
    }
}

/// Immutable copy of a session record, safe to share and serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Unique session identifier.
    pub id: SessionId,
    /// Peer role.
    pub role: Role,
    /// Operator- or agent-supplied label.
    pub display_name: String,
    /// Peer address as seen at connect time.
    pub remote_address: String,
    /// Connect timestamp (unix millis).
    pub connected_at: i64,
    /// Last heartbeat timestamp (unix millis), if any.
    pub last_heartbeat_at: Option<i64>,
    /// Lifecycle state at snapshot time.
    pub status: SessionStatus,
}
