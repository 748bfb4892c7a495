//! SQLite-backed checkpoint store implementation.
//!
//! This module provides [`SqliteCheckpointStore`], a persistent
//! implementation of [`CheckpointStore`] backed by SQLite.

use crate::{HeddleError, Result, ReviewPackage, RunState};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::CheckpointStore;

/// Schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

/// SQL for creating the run_snapshots table.
const CREATE_RUN_SNAPSHOTS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS run_snapshots (
        run_id TEXT NOT NULL PRIMARY KEY,
        status TEXT NOT NULL,
        current_step TEXT,
        state_json TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
"#;

/// SQL for creating the pending_payloads table.
const CREATE_PENDING_PAYLOADS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS pending_payloads (
        run_id TEXT NOT NULL PRIMARY KEY,
        payload_json TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
"#;

/// SQL for creating the schema_version table.
const CREATE_SCHEMA_VERSION_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    )
"#;

/// Index on run_snapshots for querying by status.
const CREATE_STATUS_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_run_status
    ON run_snapshots (status)
"#;

fn join_error(e: tokio::task::JoinError) -> HeddleError {
    HeddleError::Checkpoint(format!("spawn_blocking failed: {}", e))
}

fn decode_error(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

/// A SQLite-backed implementation of [`CheckpointStore`].
///
/// Snapshots are stored as JSON next to their status and current step, so
/// the database can be queried without deserializing. Each write is a
/// single `INSERT OR REPLACE`, which SQLite applies atomically.
///
/// # Thread Safety
///
/// The store wraps the SQLite connection in a `Mutex` and uses
/// `spawn_blocking` for all database operations, making it safe
/// for use in async contexts.
///
/// # Example
///
/// ```rust,ignore
/// use heddle::SqliteCheckpointStore;
///
/// // Open or create a database file
/// let store = SqliteCheckpointStore::open("runs.db").await?;
///
/// // Or use an in-memory database for testing
/// let store = SqliteCheckpointStore::open_in_memory().await?;
/// ```
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// Opens a SQLite database at the given path.
    ///
    /// Creates the database and schema if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the
    /// schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let conn = tokio::task::spawn_blocking(move || Connection::open(&path))
            .await
            .map_err(join_error)?
            .map_err(|e| HeddleError::Database(format!("failed to open database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.run_migrations().await?;
        Ok(store)
    }

    /// Opens an in-memory SQLite database.
    ///
    /// Useful for testing. The database is lost when the last clone of the
    /// store is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(Connection::open_in_memory)
            .await
            .map_err(join_error)?
            .map_err(|e| {
                HeddleError::Database(format!("failed to open in-memory database: {}", e))
            })?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.run_migrations().await?;
        Ok(store)
    }

    /// Runs schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            conn.execute(CREATE_SCHEMA_VERSION_TABLE, [])?;

            let version: Option<i32> = conn
                .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                    row.get(0)
                })
                .ok();

            if version.map_or(true, |v| v < SCHEMA_VERSION) {
                conn.execute(CREATE_RUN_SNAPSHOTS_TABLE, [])?;
                conn.execute(CREATE_PENDING_PAYLOADS_TABLE, [])?;
                conn.execute(CREATE_STATUS_INDEX, [])?;

                conn.execute("DELETE FROM schema_version", [])?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }

            Ok::<(), rusqlite::Error>(())
        })
        .await
        .map_err(join_error)?
        .map_err(|e| HeddleError::Database(format!("migration failed: {}", e)))?;

        Ok(())
    }

    /// Checks if the required tables exist.
    ///
    /// Useful for testing that the schema was created correctly.
    pub async fn tables_exist(&self) -> Result<bool> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            let tables: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('run_snapshots', 'pending_payloads', 'schema_version')"
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.filter_map(|r| r.ok()).collect()
            };

            Ok::<bool, rusqlite::Error>(tables.len() == 3)
        })
        .await
        .map_err(join_error)?
        .map_err(|e| HeddleError::Database(format!("table check failed: {}", e)))
    }

    /// Lists the ids of runs whose last snapshot has `status`, sorted.
    ///
    /// Useful for finding `running` runs to recover after a crash.
    pub async fn runs_with_status(&self, status: crate::RunStatus) -> Result<Vec<String>> {
        let conn = Arc::clone(&self.conn);
        let status = status.as_str();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            let mut stmt = conn
                .prepare("SELECT run_id FROM run_snapshots WHERE status = ?1 ORDER BY run_id")?;
            let rows = stmt.query_map(params![status], |row| row.get(0))?;

            let result: std::result::Result<Vec<String>, _> = rows.collect();
            result
        })
        .await
        .map_err(join_error)?
        .map_err(|e| HeddleError::Database(format!("query failed: {}", e)))
    }
}

// Debug implementation that doesn't expose connection details
impl std::fmt::Debug for SqliteCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&mut self, run_id: &str, snapshot: &RunState) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let run_id = run_id.to_string();
        let status = snapshot.status.as_str();
        let current_step = snapshot.current_step.map(|s| s.as_str());
        let state_json = serde_json::to_string(snapshot).map_err(|e| {
            HeddleError::Checkpoint(format!("failed to serialize snapshot: {}", e))
        })?;
        let updated_at = snapshot.updated_at.to_rfc3339();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            conn.execute(
                "INSERT OR REPLACE INTO run_snapshots (run_id, status, current_step, state_json, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![run_id, status, current_step, state_json, updated_at],
            )?;

            Ok::<(), rusqlite::Error>(())
        })
        .await
        .map_err(join_error)?
        .map_err(|e| HeddleError::Database(format!("insert failed: {}", e)))?;

        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunState>> {
        let conn = Arc::clone(&self.conn);
        let run_id = run_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            let result = conn.query_row(
                "SELECT state_json FROM run_snapshots WHERE run_id = ?1",
                params![run_id],
                |row| row.get::<_, String>(0),
            );

            match result {
                Ok(state_json) => {
                    let state: RunState =
                        serde_json::from_str(&state_json).map_err(decode_error)?;
                    Ok(Some(state))
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(join_error)?
        .map_err(|e| HeddleError::Database(format!("query failed: {}", e)))
    }

    async fn save_pending_payload(
        &mut self,
        run_id: &str,
        payload: &ReviewPackage,
    ) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let run_id = run_id.to_string();
        let payload_json = serde_json::to_string(payload).map_err(|e| {
            HeddleError::Checkpoint(format!("failed to serialize payload: {}", e))
        })?;
        let created_at = payload.requested_at.to_rfc3339();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            conn.execute(
                "INSERT OR REPLACE INTO pending_payloads (run_id, payload_json, created_at) VALUES (?1, ?2, ?3)",
                params![run_id, payload_json, created_at],
            )?;

            Ok::<(), rusqlite::Error>(())
        })
        .await
        .map_err(join_error)?
        .map_err(|e| HeddleError::Database(format!("insert failed: {}", e)))?;

        Ok(())
    }

    async fn load_pending_payload(&self, run_id: &str) -> Result<Option<ReviewPackage>> {
        let conn = Arc::clone(&self.conn);
        let run_id = run_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            let result = conn.query_row(
                "SELECT payload_json FROM pending_payloads WHERE run_id = ?1",
                params![run_id],
                |row| row.get::<_, String>(0),
            );

            match result {
                Ok(payload_json) => {
                    let payload: ReviewPackage =
                        serde_json::from_str(&payload_json).map_err(decode_error)?;
                    Ok(Some(payload))
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(join_error)?
        .map_err(|e| HeddleError::Database(format!("query failed: {}", e)))
    }

    async fn clear_pending_payload(&mut self, run_id: &str) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let run_id = run_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "DELETE FROM pending_payloads WHERE run_id = ?1",
                params![run_id],
            )?;
            Ok::<(), rusqlite::Error>(())
        })
        .await
        .map_err(join_error)?
        .map_err(|e| HeddleError::Database(format!("delete failed: {}", e)))?;

        Ok(())
    }

    async fn delete_run(&mut self, run_id: &str) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let run_id = run_id.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM pending_payloads WHERE run_id = ?1",
                params![run_id],
            )?;
            tx.execute(
                "DELETE FROM run_snapshots WHERE run_id = ?1",
                params![run_id],
            )?;
            tx.commit()
        })
        .await
        .map_err(join_error)?
        .map_err(|e| HeddleError::Database(format!("delete failed: {}", e)))?;

        Ok(())
    }

    async fn list_runs(&self) -> Result<Vec<String>> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            let mut stmt = conn.prepare("SELECT run_id FROM run_snapshots ORDER BY run_id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;

            let result: std::result::Result<Vec<String>, _> = rows.collect();
            result
        })
        .await
        .map_err(join_error)?
        .map_err(|e| HeddleError::Database(format!("query failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeneratedRecord, RunInputs, RunStatus, StepName};
    use chrono::Utc;

    #[tokio::test]
    async fn test_open_in_memory() {
        let store = SqliteCheckpointStore::open_in_memory().await;
        assert!(store.is_ok());
    }

    #[tokio::test]
    async fn test_tables_created() {
        let store = SqliteCheckpointStore::open_in_memory().await.unwrap();
        assert!(store.tables_exist().await.unwrap());
    }

    #[tokio::test]
    async fn test_reopen_preserves_schema() {
        let db_path =
            std::env::temp_dir().join(format!("heddle_test_reopen_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&db_path);

        {
            let store = SqliteCheckpointStore::open(&db_path).await.unwrap();
            assert!(store.tables_exist().await.unwrap());
        }
        {
            let store = SqliteCheckpointStore::open(&db_path).await.unwrap();
            assert!(store.tables_exist().await.unwrap());
        }

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let mut store = SqliteCheckpointStore::open_in_memory().await.unwrap();
        assert!(store.load("run-1").await.unwrap().is_none());

        let mut state = RunState::new("run-1", RunInputs::new("S1"));
        state.mark_running();
        state.record_completed(StepName::LoadSubject, Utc::now());
        store.save("run-1", &state).await.unwrap();

        let loaded = store.load("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.current_step, Some(StepName::LoadSubject));
        assert_eq!(loaded.history.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_payload_lifecycle() {
        let mut store = SqliteCheckpointStore::open_in_memory().await.unwrap();
        let state = RunState::new("run-1", RunInputs::new("S1"));
        let mut payload = ReviewPackage::from_state(&state);
        payload.records = vec![GeneratedRecord::new("a"), GeneratedRecord::new("b")];

        store.save_pending_payload("run-1", &payload).await.unwrap();
        let loaded = store.load_pending_payload("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.records.len(), 2);

        store.clear_pending_payload("run-1").await.unwrap();
        assert!(store.load_pending_payload("run-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let mut store = SqliteCheckpointStore::open_in_memory().await.unwrap();
        for id in ["run-2", "run-1"] {
            store
                .save(id, &RunState::new(id, RunInputs::new("S1")))
                .await
                .unwrap();
        }
        assert_eq!(store.list_runs().await.unwrap(), vec!["run-1", "run-2"]);

        store.delete_run("run-1").await.unwrap();
        assert_eq!(store.list_runs().await.unwrap(), vec!["run-2"]);
    }

    #[tokio::test]
    async fn test_runs_with_status() {
        let mut store = SqliteCheckpointStore::open_in_memory().await.unwrap();
        let mut running = RunState::new("run-1", RunInputs::new("S1"));
        running.mark_running();
        let mut failed = RunState::new("run-2", RunInputs::new("S1"));
        failed.mark_failed(None, "boom");

        store.save("run-1", &running).await.unwrap();
        store.save("run-2", &failed).await.unwrap();

        assert_eq!(
            store.runs_with_status(RunStatus::Running).await.unwrap(),
            vec!["run-1"]
        );
        assert_eq!(
            store.runs_with_status(RunStatus::Failed).await.unwrap(),
            vec!["run-2"]
        );
    }

    #[tokio::test]
    async fn test_persistence_across_reopens() {
        let db_path =
            std::env::temp_dir().join(format!("heddle_persist_test_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&db_path);

        {
            let mut store = SqliteCheckpointStore::open(&db_path).await.unwrap();
            let mut state = RunState::new("run-1", RunInputs::new("S1"));
            state.mark_suspended(StepName::HumanReview, Utc::now());
            store.save("run-1", &state).await.unwrap();
            store
                .save_pending_payload("run-1", &ReviewPackage::from_state(&state))
                .await
                .unwrap();
        }

        {
            let store = SqliteCheckpointStore::open(&db_path).await.unwrap();
            let state = store.load("run-1").await.unwrap().unwrap();
            assert_eq!(state.status, RunStatus::Suspended);
            assert!(store.load_pending_payload("run-1").await.unwrap().is_some());
        }

        let _ = std::fs::remove_file(&db_path);
    }
}
