//! Operator command records.

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// Outcome of a directed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Queued on the target's connection.
    Delivered,
    /// Target id was not present at validation time.
    TargetNotFound,
    /// Target disconnected between validation and delivery.
    TargetGone,
}

/// Transient record of one operator-issued command.
///
/// Not retained in memory beyond delivery; mirrored to the persistence sink
/// for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Session the command was addressed to.
    pub target: SessionId,
    /// Raw command payload.
    pub payload: String,
    /// Submission timestamp (unix millis).
    pub submitted_at: i64,
    /// Delivery outcome.
    pub outcome: DeliveryOutcome,
}
