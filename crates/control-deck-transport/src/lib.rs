//! Transport gateway for the control-deck server.
//!
//! Provides:
//! - Wire protocol (JSON tagged enums)
//! - WebSocket gateway mapping frames to registry and bus operations

pub mod gateway;
pub mod protocol;

pub use gateway::GatewayState;
pub use protocol::{ClientFrame, ServerFrame};
