//! SQLite checkpoint store.
//!
//! One table, `checkpoints`, holds a row per graph step:
//! `(thread_id, step)` is unique and `messages` is the JSON array of the
//! messages that step added. The pool runs in WAL mode so sidebar listings
//! and history loads can proceed while a turn appends.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use threadline_core::checkpoint::{Checkpoint, CheckpointSource, CheckpointStore};
use threadline_core::error::CheckpointError;
use threadline_core::message::{Message, ThreadId};
use tracing::{debug, info};

/// A production SQLite checkpoint store.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open a store from a connection string or file name.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database shared by the pool
    /// (useful for tests).
    pub async fn new(url: &str) -> Result<Self, CheckpointError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| CheckpointError::Storage(format!("Invalid SQLite path: {e}")))?;
        let store = Self::connect(options).await?;
        info!("SQLite checkpoint store initialized at {url}");
        Ok(store)
    }

    /// Open (creating if needed) a database file, including parent directories.
    pub async fn open(path: &Path) -> Result<Self, CheckpointError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CheckpointError::Storage(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }
        let store = Self::connect(SqliteConnectOptions::new().filename(path)).await?;
        info!(path = %path.display(), "SQLite checkpoint store initialized");
        Ok(store)
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, CheckpointError> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| CheckpointError::Storage(format!("Failed to open SQLite: {e}")))?;

        Self::from_pool(pool).await
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, CheckpointError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run schema migrations.
    async fn run_migrations(&self) -> Result<(), CheckpointError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id   TEXT NOT NULL,
                step        INTEGER NOT NULL,
                source      TEXT NOT NULL,
                run_name    TEXT,
                messages    TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                UNIQUE (thread_id, step)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CheckpointError::MigrationFailed(format!("checkpoints table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_thread ON checkpoints(thread_id, step)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CheckpointError::MigrationFailed(format!("thread index: {e}")))?;

        debug!("Checkpoint migrations applied");
        Ok(())
    }

    fn decode_messages(thread_id: &ThreadId, raw: &str) -> Result<Vec<Message>, CheckpointError> {
        serde_json::from_str(raw).map_err(|e| CheckpointError::Corrupt {
            thread_id: thread_id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Every checkpoint of a thread, oldest first.
    pub async fn history(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, CheckpointError> {
        let rows = sqlx::query(
            r#"
            SELECT step, source, run_name, messages, created_at
            FROM checkpoints WHERE thread_id = ?1 ORDER BY step
            "#,
        )
        .bind(thread_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CheckpointError::QueryFailed(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let query_err = |e: sqlx::Error| CheckpointError::QueryFailed(e.to_string());
                let step: i64 = row.try_get("step").map_err(query_err)?;
                let source: String = row.try_get("source").map_err(query_err)?;
                let run_name: Option<String> = row.try_get("run_name").map_err(query_err)?;
                let messages: String = row.try_get("messages").map_err(query_err)?;
                let created_at: String = row.try_get("created_at").map_err(query_err)?;

                Ok(Checkpoint {
                    thread_id: thread_id.clone(),
                    step: step as u64,
                    source: CheckpointSource::parse(&source).ok_or_else(|| {
                        CheckpointError::Corrupt {
                            thread_id: thread_id.to_string(),
                            reason: format!("unknown source '{source}'"),
                        }
                    })?,
                    run_name,
                    messages: Self::decode_messages(thread_id, &messages)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .collect()
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn list_threads(&self) -> Result<Vec<ThreadId>, CheckpointError> {
        let rows = sqlx::query(
            "SELECT thread_id FROM checkpoints GROUP BY thread_id ORDER BY MIN(id)",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CheckpointError::QueryFailed(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("thread_id")
                    .map(ThreadId)
                    .map_err(|e| CheckpointError::QueryFailed(e.to_string()))
            })
            .collect()
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<Vec<Message>, CheckpointError> {
        let rows = sqlx::query("SELECT messages FROM checkpoints WHERE thread_id = ?1 ORDER BY step")
            .bind(thread_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CheckpointError::QueryFailed(e.to_string()))?;

        let mut messages = Vec::new();
        for row in &rows {
            let raw: String = row
                .try_get("messages")
                .map_err(|e| CheckpointError::QueryFailed(e.to_string()))?;
            messages.extend(Self::decode_messages(thread_id, &raw)?);
        }
        debug!(thread_id = %thread_id, steps = rows.len(), messages = messages.len(), "Loaded thread");
        Ok(messages)
    }

    async fn append(&self, checkpoint: Checkpoint) -> Result<u64, CheckpointError> {
        let messages = serde_json::to_string(&checkpoint.messages)
            .map_err(|e| CheckpointError::Storage(format!("Cannot encode messages: {e}")))?;

        // Step assignment and insert happen in one statement.
        let row = sqlx::query(
            r#"
            INSERT INTO checkpoints (thread_id, step, source, run_name, messages, created_at)
            SELECT ?1, COALESCE(MAX(step) + 1, 0), ?2, ?3, ?4, ?5
            FROM checkpoints WHERE thread_id = ?1
            RETURNING step
            "#,
        )
        .bind(checkpoint.thread_id.as_str())
        .bind(checkpoint.source.as_str())
        .bind(checkpoint.run_name.as_deref())
        .bind(&messages)
        .bind(checkpoint.created_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CheckpointError::Storage(format!("Append failed: {e}")))?;

        let step: i64 = row
            .try_get("step")
            .map_err(|e| CheckpointError::QueryFailed(e.to_string()))?;

        debug!(
            thread_id = %checkpoint.thread_id,
            step,
            source = checkpoint.source.as_str(),
            messages = checkpoint.messages.len(),
            "Checkpoint appended"
        );
        Ok(step as u64)
    }

    async fn count(&self, thread_id: &ThreadId) -> Result<u64, CheckpointError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM checkpoints WHERE thread_id = ?1")
            .bind(thread_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CheckpointError::QueryFailed(e.to_string()))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| CheckpointError::QueryFailed(e.to_string()))?;
        Ok(n as u64)
    }
}
