//! Wire protocol for peer-server communication.

use control_deck_core::{DeliveryOutcome, Event, SessionId, SessionSnapshot};
use serde::{Deserialize, Serialize};

/// Frame from a connected peer (agent or observer) to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Keepalive, optionally renaming the session.
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },
    /// Request the current roster.
    GetRoster,
    /// Push a command to one agent.
    SendCommand {
        target_id: SessionId,
        payload: String,
    },
    /// Ask one agent for its file listing.
    RequestFiles { target_id: SessionId },
    /// Forcibly disconnect another session.
    DisconnectRequest { target_id: SessionId },
    /// Agent reporting a file it holds.
    FileNotify { filename: String, size: u64 },
}

/// Frame from the server to a connected peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake acknowledgment carrying the assigned session id.
    Connected { session_id: SessionId },
    /// The live roster changed.
    RosterChanged { sessions: Vec<SessionSnapshot> },
    /// Outcome of a directed request.
    CommandAck {
        target_id: SessionId,
        outcome: DeliveryOutcome,
    },
    /// Heartbeat acknowledgment.
    HeartbeatAck { timestamp: i64 },
    /// Operator command for the receiving agent.
    Command { payload: String },
    /// Operator asked the receiving agent for its file listing.
    FileRequest,
    /// The server is closing this connection.
    Disconnect,
    /// Frame-level error notice; the connection stays open.
    Error { message: String },
}

impl From<Event> for ServerFrame {
    fn from(event: Event) -> Self {
        match event {
            Event::RosterChanged { sessions } => Self::RosterChanged { sessions },
            Event::Command { payload } => Self::Command { payload },
            Event::FileRequest => Self::FileRequest,
            Event::Disconnect => Self::Disconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn client_frames_use_snake_case_tags() {
        let frame = ClientFrame::SendCommand {
            target_id: Uuid::new_v4(),
            payload: "uptime".into(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"send_command""#));

        let parsed: ClientFrame = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientFrame::SendCommand { payload, .. } => assert_eq!(payload, "uptime"),
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn heartbeat_display_name_is_optional() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        match frame {
            ClientFrame::Heartbeat { display_name } => assert!(display_name.is_none()),
            other => panic!("wrong frame: {other:?}"),
        }

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"heartbeat","display_name":"edge-7"}"#).unwrap();
        match frame {
            ClientFrame::Heartbeat { display_name } => {
                assert_eq!(display_name.as_deref(), Some("edge-7"));
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn command_ack_outcome_encoding() {
        let frame = ServerFrame::CommandAck {
            target_id: Uuid::new_v4(),
            outcome: DeliveryOutcome::TargetGone,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""outcome":"target_gone""#));
    }

    #[test]
    fn bus_events_map_onto_wire_frames() {
        let frame = ServerFrame::from(Event::Command {
            payload: "reboot".into(),
        });
        assert!(matches!(frame, ServerFrame::Command { payload } if payload == "reboot"));
        assert!(matches!(
            ServerFrame::from(Event::Disconnect),
            ServerFrame::Disconnect
        ));
    }
}
