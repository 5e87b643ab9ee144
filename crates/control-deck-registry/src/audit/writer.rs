//! Fire-and-forget audit dispatch.

use control_deck_core::{CommandRecord, PersistenceSink, SessionId, SessionStatus};
use tokio::sync::mpsc;

/// Queue depth for pending audit events.
const AUDIT_QUEUE_DEPTH: usize = 256;

/// One queued audit event.
#[derive(Debug)]
enum AuditEvent {
    Session {
        id: SessionId,
        status: SessionStatus,
        timestamp: i64,
    },
    Command(CommandRecord),
    File {
        id: SessionId,
        filename: String,
        size: u64,
        timestamp: i64,
    },
}

/// Handle that mirrors events into a [`PersistenceSink`] off the hot path.
///
/// All `record_*` methods enqueue and return immediately; a background task
/// drains the queue into the sink. A slow sink fills the queue and further
/// events are dropped with a log line, never blocking a connection task.
#[derive(Clone)]
pub struct AuditWriter {
    tx: mpsc::Sender<AuditEvent>,
}

impl AuditWriter {
    /// Spawn the drain task for `sink` and return the writer handle.
    ///
    /// The task exits once every writer clone has been dropped and the
    /// queue is drained; the returned join handle lets the caller wait for
    /// that on shutdown.
    pub fn spawn<S>(sink: S) -> (Self, tokio::task::JoinHandle<()>)
    where
        S: PersistenceSink + 'static,
    {
        let (tx, mut rx) = mpsc::channel(AUDIT_QUEUE_DEPTH);
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let result = match &event {
                    AuditEvent::Session {
                        id,
                        status,
                        timestamp,
                    } => sink.record_session_event(*id, *status, *timestamp).await,
                    AuditEvent::Command(record) => sink.record_command(record).await,
                    AuditEvent::File {
                        id,
                        filename,
                        size,
                        timestamp,
                    } => {
                        sink.record_file_event(*id, filename, *size, *timestamp)
                            .await
                    }
                };
                if let Err(e) = result {
                    tracing::warn!("audit write failed: {e}");
                }
            }
        });
        (Self { tx }, task)
    }

    /// Queue a session lifecycle transition.
    pub fn record_session_event(&self, id: SessionId, status: SessionStatus, timestamp: i64) {
        self.push(AuditEvent::Session {
            id,
            status,
            timestamp,
        });
    }

    /// Queue an operator command record.
    pub fn record_command(&self, record: CommandRecord) {
        self.push(AuditEvent::Command(record));
    }

    /// Queue a file reported by an agent.
    pub fn record_file_event(&self, id: SessionId, filename: String, size: u64, timestamp: i64) {
        self.push(AuditEvent::File {
            id,
            filename,
            size,
            timestamp,
        });
    }

    fn push(&self, event: AuditEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::debug!("audit event dropped: {e}");
        }
    }
}
