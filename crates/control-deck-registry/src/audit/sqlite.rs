//! SQLite audit sink (feature-gated).

use std::{path::Path, str::FromStr};

use async_trait::async_trait;
use control_deck_core::{
    CommandRecord, DeliveryOutcome, PersistenceSink, SessionId, SessionStatus, traits::SinkError,
};
use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

/// SQLite-backed audit sink.
///
/// Mirrors session, command, and file events into three append-mostly
/// tables. The `clients` table keeps one row per session id with its
/// latest status.
pub struct SqliteSink {
    pool: Pool<Sqlite>,
}

impl SqliteSink {
    /// Open (creating if needed) the database at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or the schema cannot
    /// be created.
    pub async fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SinkError::Unavailable(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(|e| SinkError::Unavailable(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        tracing::info!(path = %path.display(), "audit database opened");

        let sink = Self { pool };
        sink.create_schema().await?;
        Ok(sink)
    }

    /// Open a private in-memory database. For tests.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn open_in_memory() -> Result<Self, SinkError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        let sink = Self { pool };
        sink.create_schema().await?;
        Ok(sink)
    }

    async fn create_schema(&self) -> Result<(), SinkError> {
        for statement in [
            "CREATE TABLE IF NOT EXISTS clients (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                last_seen INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS commands (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id TEXT NOT NULL,
                command TEXT NOT NULL,
                outcome TEXT NOT NULL,
                submitted_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                size INTEGER NOT NULL,
                reported_at INTEGER NOT NULL
            )",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| SinkError::Internal(e.to_string()))?;
        }
        Ok(())
    }
}

fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Connecting => "connecting",
        SessionStatus::Active => "active",
        SessionStatus::Disconnected => "disconnected",
    }
}

fn outcome_label(outcome: DeliveryOutcome) -> &'static str {
    match outcome {
        DeliveryOutcome::Delivered => "delivered",
        DeliveryOutcome::TargetNotFound => "target_not_found",
        DeliveryOutcome::TargetGone => "target_gone",
    }
}

#[async_trait]
impl PersistenceSink for SqliteSink {
    async fn record_session_event(
        &self,
        id: SessionId,
        status: SessionStatus,
        timestamp: i64,
    ) -> Result<(), SinkError> {
        sqlx::query(
            "INSERT INTO clients (id, status, last_seen) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, last_seen = excluded.last_seen",
        )
        .bind(id.to_string())
        .bind(status_label(status))
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| SinkError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn record_command(&self, record: &CommandRecord) -> Result<(), SinkError> {
        sqlx::query(
            "INSERT INTO commands (client_id, command, outcome, submitted_at) VALUES (?, ?, ?, ?)",
        )
        .bind(record.target.to_string())
        .bind(&record.payload)
        .bind(outcome_label(record.outcome))
        .bind(record.submitted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SinkError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn record_file_event(
        &self,
        id: SessionId,
        filename: &str,
        size: u64,
        timestamp: i64,
    ) -> Result<(), SinkError> {
        sqlx::query(
            "INSERT INTO files (client_id, filename, size, reported_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(filename)
        .bind(i64::try_from(size).unwrap_or(i64::MAX))
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| SinkError::Internal(e.to_string()))?;
        Ok(())
    }
}
