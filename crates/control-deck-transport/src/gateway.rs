//! WebSocket gateway.
//!
//! Owns the physical connections and maps wire frames to registry and bus
//! operations. Each connection runs a read loop plus a forwarding task that
//! drains both the session's bus queue and a local reply queue into the
//! socket.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::{
        ConnectInfo, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use control_deck_core::{
    CommandRecord, DeliveryOutcome, Event, EventBus, Role, SessionId, SessionStatus,
    time::now_millis,
};
use control_deck_registry::{Registry, RegistryError, audit::AuditWriter};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::protocol::{ClientFrame, ServerFrame};

/// Depth of the per-connection reply queue (acks and error notices).
const REPLY_QUEUE_DEPTH: usize = 32;

/// Shared handles every connection task works against.
///
/// The gateway holds session ids as lookup keys only; all mutation goes
/// through the registry's operations.
#[derive(Clone)]
pub struct GatewayState {
    /// Authoritative session registry.
    pub registry: Arc<Registry>,
    /// Event fan-out.
    pub bus: Arc<EventBus>,
    /// Fire-and-forget audit handle.
    pub audit: AuditWriter,
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    role: Option<Role>,
}

/// Router exposing the gateway at `/ws`.
///
/// The `role` query parameter selects agent or observer; absent means
/// observer. Serve with `into_make_service_with_connect_info::<SocketAddr>()`
/// so peer addresses are available.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    let role = params.role.unwrap_or(Role::Observer);
    ws.on_upgrade(move |socket| handle_socket(socket, addr, role, state))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, role: Role, state: GatewayState) {
    let id = match state.registry.register(role, &addr.to_string()) {
        Ok(id) => id,
        Err(e) => {
            // Fatal to this connection attempt only.
            tracing::error!(%addr, "connection rejected: {e}");
            return;
        }
    };

    let (reply_tx, reply_rx) = mpsc::channel::<ServerFrame>(REPLY_QUEUE_DEPTH);
    let events = state.bus.subscribe(id, role);

    // Activation broadcasts the new roster from inside the registry's
    // critical section, so racing accepts can never publish out of order.
    if let Err(e) = state.registry.activate(id) {
        tracing::error!(session = %id, "activation failed: {e}");
        state.bus.unsubscribe(id);
        let _ = state.registry.remove(id);
        return;
    }

    state
        .audit
        .record_session_event(id, SessionStatus::Active, now_millis());
    tracing::info!(session = %id, %addr, ?role, "session connected");

    let _ = reply_tx.try_send(ServerFrame::Connected { session_id: id });

    let (sender, mut receiver) = socket.split();
    let send_task = tokio::spawn(forward_frames(sender, events, reply_rx));

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(session = %id, "websocket error: {e}");
                break;
            }
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                // One bad frame never terminates the connection.
                tracing::warn!(session = %id, "invalid client frame: {e}");
                reply(
                    &reply_tx,
                    ServerFrame::Error {
                        message: format!("invalid frame: {e}"),
                    },
                );
                continue;
            }
        };

        dispatch_frame(&state, id, role, frame, &reply_tx);
    }

    disconnect_session(&state, id);
    send_task.abort();
}

/// Drain bus events and local replies into the socket, in arrival order per
/// source. An `Event::Disconnect` is forwarded and then closes the socket,
/// as does the bus subscription disappearing (eviction or replacement), so
/// the read loop wakes up and runs cleanup.
async fn forward_frames<S>(
    mut sender: S,
    mut events: mpsc::Receiver<Event>,
    mut replies: mpsc::Receiver<ServerFrame>,
) where
    S: futures::Sink<Message> + Unpin,
{
    loop {
        let (frame, disconnect) = tokio::select! {
            maybe = replies.recv() => match maybe {
                Some(frame) => (frame, false),
                None => break,
            },
            maybe = events.recv() => match maybe {
                Some(event) => {
                    let disconnect = matches!(event, Event::Disconnect);
                    (ServerFrame::from(event), disconnect)
                }
                None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
        };

        let json = match serde_json::to_string(&frame) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("failed to serialize frame: {e}");
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }
        if disconnect {
            let _ = sender.send(Message::Close(None)).await;
            break;
        }
    }
}

/// Map one inbound frame to registry and bus operations.
///
/// Registry and bus errors never escape this function; they become acks,
/// log lines, or silent drops per the frame's contract.
fn dispatch_frame(
    state: &GatewayState,
    id: SessionId,
    role: Role,
    frame: ClientFrame,
    replies: &mpsc::Sender<ServerFrame>,
) {
    match frame {
        ClientFrame::Heartbeat { display_name } => {
            match state.registry.heartbeat(id, display_name.as_deref()) {
                Ok(timestamp) => reply(replies, ServerFrame::HeartbeatAck { timestamp }),
                Err(RegistryError::NotFound(_)) => {
                    // Straggler racing our own disconnect; drop it.
                    tracing::debug!(session = %id, "heartbeat after disconnect dropped");
                }
                Err(e) => tracing::warn!(session = %id, "heartbeat rejected: {e}"),
            }
        }
        ClientFrame::GetRoster => {
            reply(
                replies,
                ServerFrame::RosterChanged {
                    sessions: state.registry.snapshot_all(),
                },
            );
        }
        ClientFrame::SendCommand { target_id, payload } => {
            let submitted_at = now_millis();
            if state.registry.lookup(target_id).is_err() {
                reply(
                    replies,
                    ServerFrame::CommandAck {
                        target_id,
                        outcome: DeliveryOutcome::TargetNotFound,
                    },
                );
                return;
            }
            let outcome = deliver(
                &state.bus,
                target_id,
                Event::Command {
                    payload: payload.clone(),
                },
            );
            state.audit.record_command(CommandRecord {
                target: target_id,
                payload,
                submitted_at,
                outcome,
            });
            reply(replies, ServerFrame::CommandAck { target_id, outcome });
        }
        ClientFrame::RequestFiles { target_id } => {
            let outcome = if state.registry.lookup(target_id).is_ok() {
                deliver(&state.bus, target_id, Event::FileRequest)
            } else {
                DeliveryOutcome::TargetNotFound
            };
            reply(replies, ServerFrame::CommandAck { target_id, outcome });
        }
        ClientFrame::DisconnectRequest { target_id } => {
            let outcome = if state.registry.lookup(target_id).is_ok() {
                // The target's own task runs the cleanup path on receipt.
                deliver(&state.bus, target_id, Event::Disconnect)
            } else {
                DeliveryOutcome::TargetNotFound
            };
            reply(replies, ServerFrame::CommandAck { target_id, outcome });
        }
        ClientFrame::FileNotify { filename, size } => {
            if role == Role::Agent {
                state.audit.record_file_event(id, filename, size, now_millis());
            } else {
                tracing::warn!(session = %id, "file_notify from non-agent dropped");
            }
        }
    }
}

/// Directed delivery after a successful lookup. A target that vanished
/// between lookup and delivery is reported gone, not absent.
fn deliver(bus: &EventBus, target_id: SessionId, event: Event) -> DeliveryOutcome {
    match bus.send_direct(target_id, event) {
        DeliveryOutcome::Delivered => DeliveryOutcome::Delivered,
        DeliveryOutcome::TargetNotFound | DeliveryOutcome::TargetGone => {
            DeliveryOutcome::TargetGone
        }
    }
}

fn reply(replies: &mpsc::Sender<ServerFrame>, frame: ServerFrame) {
    if let Err(e) = replies.try_send(frame) {
        tracing::debug!("reply dropped: {e}");
    }
}

/// Cleanup path shared by explicit close, I/O failure, and eviction.
///
/// Removal broadcasts the post-removal roster from inside the registry's
/// critical section, so no subscriber observes the departed session after
/// the disconnect. Duplicate signals hit `NotFound` and are swallowed.
pub fn disconnect_session(state: &GatewayState, id: SessionId) {
    match state.registry.remove(id) {
        Ok(last) => {
            state.bus.unsubscribe(id);
            state
                .audit
                .record_session_event(id, SessionStatus::Disconnected, now_millis());
            tracing::info!(session = %id, name = %last.display_name, "session disconnected");
        }
        Err(_) => state.bus.unsubscribe(id),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use control_deck_registry::audit::MemorySink;
    use uuid::Uuid;

    use super::*;

    fn test_state() -> (GatewayState, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let (audit, _task) = AuditWriter::spawn(Arc::clone(&sink));
        let bus = Arc::new(EventBus::new());
        (
            GatewayState {
                registry: Arc::new(Registry::new(Arc::clone(&bus))),
                bus,
                audit,
            },
            sink,
        )
    }

    /// Mimic the accept sequence: register, subscribe, activate.
    fn connect(state: &GatewayState, role: Role) -> (SessionId, mpsc::Receiver<Event>) {
        let id = state.registry.register(role, "127.0.0.1:9000").unwrap();
        let rx = state.bus.subscribe(id, role);
        state.registry.activate(id).unwrap();
        (id, rx)
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn send_command_delivers_and_acks() {
        let (state, sink) = test_state();
        let (agent_id, mut agent_rx) = connect(&state, Role::Agent);
        let (operator_id, _operator_rx) = connect(&state, Role::Observer);

        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        dispatch_frame(
            &state,
            operator_id,
            Role::Observer,
            ClientFrame::SendCommand {
                target_id: agent_id,
                payload: "ping".into(),
            },
            &reply_tx,
        );

        match agent_rx.recv().await {
            Some(Event::Command { payload }) => assert_eq!(payload, "ping"),
            other => panic!("unexpected event: {other:?}"),
        }
        match reply_rx.recv().await {
            Some(ServerFrame::CommandAck { target_id, outcome }) => {
                assert_eq!(target_id, agent_id);
                assert_eq!(outcome, DeliveryOutcome::Delivered);
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        wait_until(|| !sink.commands().is_empty()).await;
        assert_eq!(sink.commands()[0].payload, "ping");
        assert_eq!(sink.commands()[0].outcome, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn command_to_unknown_target_skips_bus_and_audit() {
        let (state, sink) = test_state();
        let (operator_id, _operator_rx) = connect(&state, Role::Observer);

        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        dispatch_frame(
            &state,
            operator_id,
            Role::Observer,
            ClientFrame::SendCommand {
                target_id: Uuid::new_v4(),
                payload: "ping".into(),
            },
            &reply_tx,
        );

        match reply_rx.recv().await {
            Some(ServerFrame::CommandAck { outcome, .. }) => {
                assert_eq!(outcome, DeliveryOutcome::TargetNotFound);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(sink.commands().is_empty());
    }

    #[tokio::test]
    async fn target_vanishing_after_lookup_is_reported_gone() {
        let (state, _sink) = test_state();
        let (agent_id, agent_rx) = connect(&state, Role::Agent);
        let (operator_id, _operator_rx) = connect(&state, Role::Observer);

        // The agent's queue closes while its registry entry still exists,
        // exactly the window between lookup and delivery.
        drop(agent_rx);

        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        dispatch_frame(
            &state,
            operator_id,
            Role::Observer,
            ClientFrame::SendCommand {
                target_id: agent_id,
                payload: "ping".into(),
            },
            &reply_tx,
        );

        match reply_rx.recv().await {
            Some(ServerFrame::CommandAck { outcome, .. }) => {
                assert_eq!(outcome, DeliveryOutcome::TargetGone);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn straggling_heartbeat_is_dropped_silently() {
        let (state, _sink) = test_state();
        let (agent_id, _agent_rx) = connect(&state, Role::Agent);
        disconnect_session(&state, agent_id);

        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        dispatch_frame(
            &state,
            agent_id,
            Role::Agent,
            ClientFrame::Heartbeat { display_name: None },
            &reply_tx,
        );

        drop(reply_tx);
        assert!(reply_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn duplicate_disconnect_is_idempotent() {
        let (state, _sink) = test_state();
        let (agent_id, _agent_rx) = connect(&state, Role::Agent);

        disconnect_session(&state, agent_id);
        disconnect_session(&state, agent_id);

        assert!(state.registry.is_empty());
        assert_eq!(state.bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn connect_command_disconnect_scenario() {
        let (state, _sink) = test_state();
        let (observer_id, mut observer_rx) = connect(&state, Role::Observer);
        let (agent_id, mut agent_rx) = connect(&state, Role::Agent);

        // Observer sees the roster gain an active agent.
        let mut saw_agent = false;
        while let Ok(event) = observer_rx.try_recv() {
            if let Event::RosterChanged { sessions } = event {
                saw_agent = sessions
                    .iter()
                    .any(|s| s.id == agent_id && s.status == SessionStatus::Active);
            }
        }
        assert!(saw_agent);

        // Operator pushes a command; the agent receives exactly one copy.
        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        dispatch_frame(
            &state,
            observer_id,
            Role::Observer,
            ClientFrame::SendCommand {
                target_id: agent_id,
                payload: "ping".into(),
            },
            &reply_tx,
        );
        assert!(matches!(
            agent_rx.recv().await,
            Some(Event::Command { payload }) if payload == "ping"
        ));
        assert!(agent_rx.try_recv().is_err());
        assert!(matches!(
            reply_rx.recv().await,
            Some(ServerFrame::CommandAck { outcome: DeliveryOutcome::Delivered, .. })
        ));

        // Agent disconnects; the roster loses it and a late heartbeat from
        // the dead connection is dropped without effect.
        disconnect_session(&state, agent_id);
        match observer_rx.recv().await {
            Some(Event::RosterChanged { sessions }) => {
                assert!(sessions.iter().all(|s| s.id != agent_id));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        dispatch_frame(
            &state,
            agent_id,
            Role::Agent,
            ClientFrame::Heartbeat { display_name: None },
            &reply_tx,
        );
        assert!(state.registry.lookup(agent_id).is_err());
    }

    #[tokio::test]
    async fn request_files_reaches_target_agent() {
        let (state, _sink) = test_state();
        let (agent_id, mut agent_rx) = connect(&state, Role::Agent);
        let (observer_id, _observer_rx) = connect(&state, Role::Observer);

        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        dispatch_frame(
            &state,
            observer_id,
            Role::Observer,
            ClientFrame::RequestFiles {
                target_id: agent_id,
            },
            &reply_tx,
        );

        assert!(matches!(agent_rx.recv().await, Some(Event::FileRequest)));
        assert!(matches!(
            reply_rx.recv().await,
            Some(ServerFrame::CommandAck {
                target_id,
                outcome: DeliveryOutcome::Delivered,
            }) if target_id == agent_id
        ));
    }

    #[tokio::test]
    async fn request_files_for_unknown_target_is_not_found() {
        let (state, _sink) = test_state();
        let (observer_id, _observer_rx) = connect(&state, Role::Observer);

        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        dispatch_frame(
            &state,
            observer_id,
            Role::Observer,
            ClientFrame::RequestFiles {
                target_id: Uuid::new_v4(),
            },
            &reply_tx,
        );

        assert!(matches!(
            reply_rx.recv().await,
            Some(ServerFrame::CommandAck {
                outcome: DeliveryOutcome::TargetNotFound,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn disconnect_request_sends_directed_disconnect() {
        let (state, _sink) = test_state();
        let (agent_id, mut agent_rx) = connect(&state, Role::Agent);
        let (observer_id, _observer_rx) = connect(&state, Role::Observer);

        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        dispatch_frame(
            &state,
            observer_id,
            Role::Observer,
            ClientFrame::DisconnectRequest {
                target_id: agent_id,
            },
            &reply_tx,
        );

        assert!(matches!(agent_rx.recv().await, Some(Event::Disconnect)));
        assert!(matches!(
            reply_rx.recv().await,
            Some(ServerFrame::CommandAck {
                target_id,
                outcome: DeliveryOutcome::Delivered,
            }) if target_id == agent_id
        ));
    }

    #[tokio::test]
    async fn disconnect_request_for_unknown_target_is_not_found() {
        let (state, _sink) = test_state();
        let (observer_id, _observer_rx) = connect(&state, Role::Observer);

        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        dispatch_frame(
            &state,
            observer_id,
            Role::Observer,
            ClientFrame::DisconnectRequest {
                target_id: Uuid::new_v4(),
            },
            &reply_tx,
        );

        assert!(matches!(
            reply_rx.recv().await,
            Some(ServerFrame::CommandAck {
                outcome: DeliveryOutcome::TargetNotFound,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn forwarder_closes_socket_when_subscription_ends() {
        let (ws_tx, mut ws_rx) = futures::channel::mpsc::unbounded();
        let (event_tx, event_rx) = mpsc::channel::<Event>(8);
        let (reply_tx, reply_rx) = mpsc::channel::<ServerFrame>(8);

        let task = tokio::spawn(forward_frames(ws_tx, event_rx, reply_rx));

        // An evicted session's queue is dropped by `unsubscribe`; the
        // forwarder must shut the socket rather than hang.
        drop(event_tx);
        task.await.unwrap();
        drop(reply_tx);

        let mut frames = Vec::new();
        while let Ok(Some(frame)) = ws_rx.try_next() {
            frames.push(frame);
        }
        assert!(matches!(frames.last(), Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn disconnect_event_closes_after_forwarding() {
        let (ws_tx, mut ws_rx) = futures::channel::mpsc::unbounded();
        let (event_tx, event_rx) = mpsc::channel::<Event>(8);
        let (_reply_tx, reply_rx) = mpsc::channel::<ServerFrame>(8);

        let task = tokio::spawn(forward_frames(ws_tx, event_rx, reply_rx));
        event_tx.send(Event::Disconnect).await.unwrap();
        task.await.unwrap();

        let mut frames = Vec::new();
        while let Ok(Some(frame)) = ws_rx.try_next() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 2);
        assert!(matches!(
            &frames[0],
            Message::Text(text) if text.as_str().contains(r#""type":"disconnect""#)
        ));
        assert!(matches!(frames[1], Message::Close(None)));
    }

    #[tokio::test]
    async fn file_notify_is_recorded_for_agents_only() {
        let (state, sink) = test_state();
        let (agent_id, _agent_rx) = connect(&state, Role::Agent);
        let (observer_id, _observer_rx) = connect(&state, Role::Observer);

        let (reply_tx, _reply_rx) = mpsc::channel(8);
        dispatch_frame(
            &state,
            agent_id,
            Role::Agent,
            ClientFrame::FileNotify {
                filename: "report.txt".into(),
                size: 2048,
            },
            &reply_tx,
        );
        dispatch_frame(
            &state,
            observer_id,
            Role::Observer,
            ClientFrame::FileNotify {
                filename: "sneaky.txt".into(),
                size: 1,
            },
            &reply_tx,
        );

        wait_until(|| !sink.file_events().is_empty()).await;
        let files = sink.file_events();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, agent_id);
        assert_eq!(files[0].filename, "report.txt");
    }
}
