//! Event fan-out with per-recipient bounded queues.

use std::{collections::HashMap, sync::RwLock};

use tokio::sync::mpsc;

use crate::{
    command::DeliveryOutcome,
    event::Event,
    session::{Role, SessionId},
};

/// Default per-recipient queue depth.
const QUEUE_DEPTH: usize = 64;

struct Recipient {
    role: Role,
    tx: mpsc::Sender<Event>,
}

/// Fan-out bus delivering registry-change events and directed messages to
/// subscribed connections.
///
/// Every subscriber gets its own bounded queue, so one stalled recipient can
/// never block delivery to the others: `broadcast` and `send_direct` use
/// `try_send` and drop rather than wait.
pub struct EventBus {
    recipients: RwLock<HashMap<SessionId, Recipient>>,
    queue_depth: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with the default queue depth.
    #[must_use]
    pub fn new() -> Self {
        Self::with_queue_depth(QUEUE_DEPTH)
    }

    /// Create a bus with an explicit per-recipient queue depth.
    ///
    /// # Panics
    /// Panics if `queue_depth` is zero.
    #[must_use]
    pub fn with_queue_depth(queue_depth: usize) -> Self {
        assert!(queue_depth > 0, "queue depth must be non-zero");
        Self {
            recipients: RwLock::new(HashMap::new()),
            queue_depth,
        }
    }

    /// Register a session as an event recipient and return its queue.
    ///
    /// Re-subscribing an id replaces the prior queue; the old receiver sees
    /// its channel close. This guards against duplicate-connect edge cases.
    #[must_use]
    pub fn subscribe(&self, id: SessionId, role: Role) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.recipients
            .write()
            .unwrap()
            .insert(id, Recipient { role, tx });
        rx
    }

    /// Remove a recipient. Unknown ids are ignored, since unsubscribe
    /// commonly races with delivery.
    pub fn unsubscribe(&self, id: SessionId) {
        self.recipients.write().unwrap().remove(&id);
    }

    /// Deliver `event` to every subscriber in its audience, best effort.
    ///
    /// A full or closed queue drops that one recipient's copy and moves on.
    pub fn broadcast(&self, event: &Event) {
        let audience = event.audience();
        let recipients = self.recipients.read().unwrap();
        for (id, recipient) in recipients.iter() {
            if !audience.includes(recipient.role) {
                continue;
            }
            if let Err(e) = recipient.tx.try_send(event.clone()) {
                tracing::debug!(session = %id, "dropping broadcast event: {e}");
            }
        }
    }

    /// Deliver `event` to exactly one recipient.
    ///
    /// A recipient whose queue is full is reported `TargetGone`: directed
    /// sends are at-most-once and never wait on a stalled connection.
    pub fn send_direct(&self, id: SessionId, event: Event) -> DeliveryOutcome {
        let recipients = self.recipients.read().unwrap();
        let Some(recipient) = recipients.get(&id) else {
            return DeliveryOutcome::TargetNotFound;
        };
        match recipient.tx.try_send(event) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(session = %id, "direct send dropped: recipient queue full");
                DeliveryOutcome::TargetGone
            }
            Err(mpsc::error::TrySendError::Closed(_)) => DeliveryOutcome::TargetGone,
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.recipients.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::session::SessionSnapshot;

    fn roster_event() -> Event {
        Event::RosterChanged {
            sessions: Vec::<SessionSnapshot>::new(),
        }
    }

    #[tokio::test]
    async fn broadcast_respects_audience() {
        let bus = EventBus::new();
        let mut observer_rx = bus.subscribe(Uuid::new_v4(), Role::Observer);
        let mut agent_rx = bus.subscribe(Uuid::new_v4(), Role::Agent);

        bus.broadcast(&roster_event());

        assert!(matches!(
            observer_rx.recv().await,
            Some(Event::RosterChanged { .. })
        ));
        assert!(agent_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn per_recipient_fifo_ordering() {
        let bus = EventBus::new();
        let id = Uuid::new_v4();
        let mut rx = bus.subscribe(id, Role::Agent);

        for payload in ["one", "two", "three"] {
            let outcome = bus.send_direct(
                id,
                Event::Command {
                    payload: payload.into(),
                },
            );
            assert_eq!(outcome, DeliveryOutcome::Delivered);
        }

        for expected in ["one", "two", "three"] {
            match rx.recv().await {
                Some(Event::Command { payload }) => assert_eq!(payload, expected),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn direct_send_to_unknown_id_is_not_found() {
        let bus = EventBus::new();
        let outcome = bus.send_direct(
            Uuid::new_v4(),
            Event::Command {
                payload: "ping".into(),
            },
        );
        assert_eq!(outcome, DeliveryOutcome::TargetNotFound);
    }

    #[tokio::test]
    async fn direct_send_to_dropped_receiver_is_gone() {
        let bus = EventBus::new();
        let id = Uuid::new_v4();
        let rx = bus.subscribe(id, Role::Agent);
        drop(rx);

        let outcome = bus.send_direct(
            id,
            Event::Command {
                payload: "ping".into(),
            },
        );
        assert_eq!(outcome, DeliveryOutcome::TargetGone);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let bus = EventBus::with_queue_depth(1);
        let id = Uuid::new_v4();
        let mut rx = bus.subscribe(id, Role::Observer);

        // Fill the queue, then overflow it. Neither call may block.
        bus.broadcast(&roster_event());
        bus.broadcast(&roster_event());

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn resubscribe_replaces_prior_queue() {
        let bus = EventBus::new();
        let id = Uuid::new_v4();
        let mut old_rx = bus.subscribe(id, Role::Agent);
        let mut new_rx = bus.subscribe(id, Role::Agent);

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(
            bus.send_direct(
                id,
                Event::Command {
                    payload: "ping".into()
                }
            ),
            DeliveryOutcome::Delivered
        );

        // Old queue is closed, new queue got the event.
        assert!(old_rx.recv().await.is_none());
        assert!(matches!(new_rx.recv().await, Some(Event::Command { .. })));
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let id = Uuid::new_v4();
        let _rx = bus.subscribe(id, Role::Observer);

        bus.unsubscribe(id);
        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
