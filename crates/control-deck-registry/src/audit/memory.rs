//! In-memory audit sink.

use std::sync::RwLock;

use async_trait::async_trait;
use control_deck_core::{
    CommandRecord, PersistenceSink, SessionId, SessionStatus, traits::SinkError,
};

/// One recorded session transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub id: SessionId,
    pub status: SessionStatus,
    pub timestamp: i64,
}

/// One recorded file report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub id: SessionId,
    pub filename: String,
    pub size: u64,
    pub timestamp: i64,
}

/// In-memory sink implementation.
///
/// Useful for development and tests. Data is lost on restart.
#[derive(Default)]
pub struct MemorySink {
    session_events: RwLock<Vec<SessionEvent>>,
    commands: RwLock<Vec<CommandRecord>>,
    file_events: RwLock<Vec<FileEvent>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded session transitions.
    #[must_use]
    pub fn session_events(&self) -> Vec<SessionEvent> {
        self.session_events.read().unwrap().clone()
    }

    /// Recorded commands.
    #[must_use]
    pub fn commands(&self) -> Vec<CommandRecord> {
        self.commands.read().unwrap().clone()
    }

    /// Recorded file reports.
    #[must_use]
    pub fn file_events(&self) -> Vec<FileEvent> {
        self.file_events.read().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn record_session_event(
        &self,
        id: SessionId,
        status: SessionStatus,
        timestamp: i64,
    ) -> Result<(), SinkError> {
        self.session_events
            .write()
            .map_err(|e| SinkError::Internal(e.to_string()))?
            .push(SessionEvent {
                id,
                status,
                timestamp,
            });
        Ok(())
    }

    async fn record_command(&self, record: &CommandRecord) -> Result<(), SinkError> {
        self.commands
            .write()
            .map_err(|e| SinkError::Internal(e.to_string()))?
            .push(record.clone());
        Ok(())
    }

    async fn record_file_event(
        &self,
        id: SessionId,
        filename: &str,
        size: u64,
        timestamp: i64,
    ) -> Result<(), SinkError> {
        self.file_events
            .write()
            .map_err(|e| SinkError::Internal(e.to_string()))?
            .push(FileEvent {
                id,
                filename: filename.to_string(),
                size,
                timestamp,
            });
        Ok(())
    }
}
