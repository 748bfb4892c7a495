//! Checkpoint storage for Heddle runs.
//!
//! This module provides the [`CheckpointStore`] trait for persisting run
//! snapshots and pending review payloads, along with concrete
//! implementations:
//!
//! - [`MemoryCheckpointStore`]: Thread-safe in-memory storage for testing/development
//! - [`SqliteCheckpointStore`]: Durable storage backed by SQLite (`sqlite` feature)
//!
//! # Example
//!
//! ```
//! use heddle::{CheckpointStore, MemoryCheckpointStore, RunInputs, RunState};
//!
//! # async fn example() -> heddle::Result<()> {
//! let mut store = MemoryCheckpointStore::new();
//!
//! let state = RunState::new("run-1", RunInputs::new("S1"));
//! store.save("run-1", &state).await?;
//!
//! let loaded = store.load("run-1").await?;
//! assert!(loaded.is_some());
//! # Ok(())
//! # }
//! ```

mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryCheckpointStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCheckpointStore;

use crate::{Result, ReviewPackage, RunState};
use async_trait::async_trait;

/// A trait for persisting and retrieving run checkpoints.
///
/// Every key is a run id. A store keeps two things per run: the latest
/// [`RunState`] snapshot, and the [`ReviewPackage`] of a suspended run.
/// Writes replace whatever was stored before (last write wins); a reader
/// never observes a partially written value.
///
/// # Object Safety
///
/// This trait is object-safe, allowing for dynamic dispatch with
/// `dyn CheckpointStore`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Stores the snapshot for `run_id`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be saved.
    async fn save(&mut self, run_id: &str, snapshot: &RunState) -> Result<()>;

    /// Loads the latest snapshot for `run_id`.
    ///
    /// # Returns
    ///
    /// Returns `Ok(Some(state))` if the run exists, `Ok(None)` if not found,
    /// or an error if retrieval fails.
    async fn load(&self, run_id: &str) -> Result<Option<RunState>>;

    /// Stores the review package of a suspended run.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be saved.
    async fn save_pending_payload(&mut self, run_id: &str, payload: &ReviewPackage)
        -> Result<()>;

    /// Loads the review package of a suspended run.
    async fn load_pending_payload(&self, run_id: &str) -> Result<Option<ReviewPackage>>;

    /// Removes the review package once the run has left `Suspended`.
    ///
    /// Clearing a run without a payload is not an error.
    async fn clear_pending_payload(&mut self, run_id: &str) -> Result<()>;

    /// Removes the snapshot and any payload of a run.
    async fn delete_run(&mut self, run_id: &str) -> Result<()>;

    /// Lists the ids of all stored runs, sorted.
    async fn list_runs(&self) -> Result<Vec<String>>;
}
