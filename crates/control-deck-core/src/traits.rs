//! Audit persistence boundary.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    command::CommandRecord,
    session::{SessionId, SessionStatus},
};

/// Sink error.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    #[error("sink error: {0}")]
    Internal(String),
}

/// Durable mirror for session, command, and file events.
///
/// All writes are best-effort audit history; the core never consumes a
/// return value from this boundary and never waits on it inline.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Record a session lifecycle transition.
    async fn record_session_event(
        &self,
        id: SessionId,
        status: SessionStatus,
        timestamp: i64,
    ) -> Result<(), SinkError>;

    /// Record an operator-issued command and its delivery outcome.
    async fn record_command(&self, record: &CommandRecord) -> Result<(), SinkError>;

    /// Record a file reported by an agent.
    async fn record_file_event(
        &self,
        id: SessionId,
        filename: &str,
        size: u64,
        timestamp: i64,
    ) -> Result<(), SinkError>;
}

#[async_trait]
impl<S: PersistenceSink + ?Sized> PersistenceSink for Arc<S> {
    async fn record_session_event(
        &self,
        id: SessionId,
        status: SessionStatus,
        timestamp: i64,
    ) -> Result<(), SinkError> {
        (**self).record_session_event(id, status, timestamp).await
    }

    async fn record_command(&self, record: &CommandRecord) -> Result<(), SinkError> {
        (**self).record_command(record).await
    }

    async fn record_file_event(
        &self,
        id: SessionId,
        filename: &str,
        size: u64,
        timestamp: i64,
    ) -> Result<(), SinkError> {
        (**self).record_file_event(id, filename, size, timestamp).await
    }
}
