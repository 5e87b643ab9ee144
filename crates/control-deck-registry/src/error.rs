//! Registry error taxonomy.

use control_deck_core::{SessionId, SessionStatus};

/// Registry error.
///
/// `NotFound` is always a benign race (disconnect vs. a straggling frame)
/// and is swallowed by callers. `InvalidState` indicates a protocol
/// violation and is logged. `ResourceExhausted` fails only the connection
/// attempt that hit it.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("session {id} is {found:?}, operation requires {required:?}")]
    InvalidState {
        id: SessionId,
        required: SessionStatus,
        found: SessionStatus,
    },
    #[error("session identifier space exhausted")]
    ResourceExhausted,
}
