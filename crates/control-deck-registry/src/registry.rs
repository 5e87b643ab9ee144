//! Live session registry.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Arc, RwLock},
    time::Duration,
};

use control_deck_core::{
    Event, EventBus, Role, SessionId, SessionRecord, SessionSnapshot, SessionStatus,
    time::now_millis,
};
use uuid::Uuid;

use crate::error::RegistryError;

/// Retries before declaring the id space exhausted. A v4 collision is
/// practically unreachable, so this bound exists for the error contract,
/// not for real traffic.
const ID_ALLOC_ATTEMPTS: usize = 8;

/// Authoritative map of all live sessions.
///
/// Every operation runs under a single readers-writer lock, and the
/// roster-changing mutators (`activate`, `remove`) broadcast the resulting
/// roster on the event bus before releasing it. Broadcasts therefore reach
/// each recipient's queue in exactly the order the mutations were applied:
/// two racing mutators can never publish their rosters inverted and leave
/// observers on a superseded roster. Bus delivery is `try_send`-only, so
/// nothing blocks inside the critical section. The map only ever contains
/// records in `Connecting` or `Active` state; `remove` marks a record
/// `Disconnected` and deletes it in the same critical section.
pub struct Registry {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
    bus: Arc<EventBus>,
}

impl Registry {
    /// Create an empty registry publishing roster changes on `bus`.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Allocate a fresh id and insert a record in `Connecting` state.
    ///
    /// # Errors
    /// Returns `ResourceExhausted` if no unused id could be allocated.
    pub fn register(&self, role: Role, remote_address: &str) -> Result<SessionId, RegistryError> {
        let mut sessions = self.sessions.write().unwrap();
        for _ in 0..ID_ALLOC_ATTEMPTS {
            let id = Uuid::new_v4();
            if let Entry::Vacant(slot) = sessions.entry(id) {
                slot.insert(SessionRecord::new(id, role, remote_address.to_string()));
                return Ok(id);
            }
        }
        Err(RegistryError::ResourceExhausted)
    }

    /// Transition `Connecting` → `Active` and broadcast the resulting
    /// roster, still inside the critical section.
    ///
    /// # Errors
    /// Returns `NotFound` if the id is absent, `InvalidState` if the record
    /// is not in `Connecting` state.
    pub fn activate(&self, id: SessionId) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().unwrap();
        let record = sessions.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        if record.status() != SessionStatus::Connecting {
            return Err(RegistryError::InvalidState {
                id,
                required: SessionStatus::Connecting,
                found: record.status(),
            });
        }
        record.activate();
        self.bus.broadcast(&Event::RosterChanged {
            sessions: sorted_roster(&sessions),
        });
        Ok(())
    }

    /// Record a heartbeat and optionally rename the session. Returns the
    /// recorded timestamp.
    ///
    /// # Errors
    /// Returns `NotFound` if the id is absent (already disconnected); the
    /// caller treats this as a benign race and drops the frame.
    pub fn heartbeat(
        &self,
        id: SessionId,
        display_name: Option<&str>,
    ) -> Result<i64, RegistryError> {
        let mut sessions = self.sessions.write().unwrap();
        let record = sessions.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        Ok(record.touch(display_name))
    }

    /// Atomically mark a session `Disconnected`, delete it, and broadcast
    /// the resulting roster, still inside the critical section.
    ///
    /// Returns the pre-removal snapshot (with status `Disconnected`) so the
    /// caller can log the correct last-known state.
    ///
    /// # Errors
    /// Returns `NotFound` if the id is absent; duplicate disconnect signals
    /// hit this and are swallowed by the caller.
    pub fn remove(&self, id: SessionId) -> Result<SessionSnapshot, RegistryError> {
        let mut sessions = self.sessions.write().unwrap();
        let mut record = sessions.remove(&id).ok_or(RegistryError::NotFound(id))?;
        record.mark_disconnected();
        self.bus.broadcast(&Event::RosterChanged {
            sessions: sorted_roster(&sessions),
        });
        Ok(record.snapshot())
    }

    /// Point-in-time copy of every live session, ordered by connect time
    /// then id.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<SessionSnapshot> {
        sorted_roster(&self.sessions.read().unwrap())
    }

    /// Point lookup.
    ///
    /// # Errors
    /// Returns `NotFound` if the id is absent.
    pub fn lookup(&self, id: SessionId) -> Result<SessionSnapshot, RegistryError> {
        self.sessions
            .read()
            .unwrap()
            .get(&id)
            .map(SessionRecord::snapshot)
            .ok_or(RegistryError::NotFound(id))
    }

    /// Agents whose last heartbeat (or connect, if none) is older than
    /// `max_idle`. Observers are kept alive by transport-level ping/pong
    /// and are never evicted here.
    #[must_use]
    pub fn idle_agents(&self, max_idle: Duration) -> Vec<SessionId> {
        let idle_millis = i64::try_from(max_idle.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_millis().saturating_sub(idle_millis);
        self.sessions
            .read()
            .unwrap()
            .values()
            .filter(|r| r.role() == Role::Agent && r.last_seen() < cutoff)
            .map(SessionRecord::id)
            .collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().unwrap().is_empty()
    }
}

fn sorted_roster(sessions: &HashMap<SessionId, SessionRecord>) -> Vec<SessionSnapshot> {
    let mut roster: Vec<_> = sessions.values().map(SessionRecord::snapshot).collect();
    roster.sort_by(|a, b| {
        a.connected_at
            .cmp(&b.connected_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    roster
}
