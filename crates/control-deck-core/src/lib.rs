//! Core abstractions for the control-deck dashboard server.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionRecord` / `SessionSnapshot` - Identity and status of a connected peer
//! - `EventBus` - Bounded per-recipient fan-out with directed delivery
//! - `Event` - Typed bus payload with role-based audiences
//! - `CommandRecord` - Audit record for operator-issued commands
//! - `PersistenceSink` trait - Fire-and-forget audit storage boundary

pub mod bus;
pub mod command;
pub mod event;
pub mod session;
pub mod time;
pub mod traits;

pub use bus::EventBus;
pub use command::{CommandRecord, DeliveryOutcome};
pub use event::{Audience, Event};
pub use session::{Role, SessionId, SessionRecord, SessionSnapshot, SessionStatus};
pub use traits::PersistenceSink;
