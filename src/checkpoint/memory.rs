//! In-memory checkpoint store implementation.
//!
//! This module provides [`MemoryCheckpointStore`], a thread-safe in-memory
//! implementation of [`CheckpointStore`] suitable for testing and development.

use crate::{Result, ReviewPackage, RunState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::CheckpointStore;

/// Internal storage for the memory checkpoint store.
#[derive(Debug, Default)]
struct Storage {
    /// Latest snapshot per run.
    snapshots: HashMap<String, RunState>,
    /// Review packages of suspended runs.
    pending: HashMap<String, ReviewPackage>,
}

/// An in-memory implementation of [`CheckpointStore`].
///
/// This implementation uses `Arc<RwLock<...>>` internally, so clones share
/// the same data. A clone handed to a second [`Pipeline`](crate::Pipeline)
/// behaves like a restarted process reading the same durable store.
///
/// # Example
///
/// ```
/// use heddle::{CheckpointStore, MemoryCheckpointStore, RunInputs, RunState};
///
/// # async fn example() -> heddle::Result<()> {
/// let mut store = MemoryCheckpointStore::new();
/// store.save("run-1", &RunState::new("run-1", RunInputs::new("S1"))).await?;
///
/// let other_handle = store.clone();
/// assert!(other_handle.load("run-1").await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryCheckpointStore {
    storage: Arc<RwLock<Storage>>,
}

impl MemoryCheckpointStore {
    /// Creates a new, empty in-memory checkpoint store.
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(Storage::default())),
        }
    }

    /// Returns the number of runs currently stored.
    ///
    /// Useful for testing.
    pub async fn run_count(&self) -> usize {
        self.storage.read().await.snapshots.len()
    }

    /// Returns the number of pending review payloads.
    ///
    /// Useful for testing.
    pub async fn pending_count(&self) -> usize {
        self.storage.read().await.pending.len()
    }

    /// Clears all stored data.
    pub async fn clear(&self) {
        let mut storage = self.storage.write().await;
        storage.snapshots.clear();
        storage.pending.clear();
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&mut self, run_id: &str, snapshot: &RunState) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage
            .snapshots
            .insert(run_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunState>> {
        let storage = self.storage.read().await;
        Ok(storage.snapshots.get(run_id).cloned())
    }

    async fn save_pending_payload(
        &mut self,
        run_id: &str,
        payload: &ReviewPackage,
    ) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage.pending.insert(run_id.to_string(), payload.clone());
        Ok(())
    }

    async fn load_pending_payload(&self, run_id: &str) -> Result<Option<ReviewPackage>> {
        let storage = self.storage.read().await;
        Ok(storage.pending.get(run_id).cloned())
    }

    async fn clear_pending_payload(&mut self, run_id: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage.pending.remove(run_id);
        Ok(())
    }

    async fn delete_run(&mut self, run_id: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage.snapshots.remove(run_id);
        storage.pending.remove(run_id);
        Ok(())
    }

    async fn list_runs(&self) -> Result<Vec<String>> {
        let storage = self.storage.read().await;
        let mut ids: Vec<String> = storage.snapshots.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeneratedRecord, RunInputs, RunStatus, StepName};
    use chrono::Utc;

    fn package(run_id: &str) -> ReviewPackage {
        let state = RunState::new(run_id, RunInputs::new("S1"));
        ReviewPackage::from_state(&state)
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.run_count().await, 0);
        assert_eq!(store.pending_count().await, 0);
        assert!(store.list_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let mut store = MemoryCheckpointStore::new();
        let mut state = RunState::new("run-1", RunInputs::new("S1"));
        state.mark_running();

        store.save("run-1", &state).await.unwrap();

        let loaded = store.load("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let mut store = MemoryCheckpointStore::new();
        let mut state = RunState::new("run-1", RunInputs::new("S1"));
        store.save("run-1", &state).await.unwrap();

        state.record_completed(StepName::LoadSubject, Utc::now());
        store.save("run-1", &state).await.unwrap();

        let loaded = store.load("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.current_step, Some(StepName::LoadSubject));
        assert_eq!(store.run_count().await, 1);
    }

    #[tokio::test]
    async fn test_pending_payload_lifecycle() {
        let mut store = MemoryCheckpointStore::new();
        let mut payload = package("run-1");
        payload.records = vec![GeneratedRecord::new("row")];

        store.save_pending_payload("run-1", &payload).await.unwrap();
        let loaded = store.load_pending_payload("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.records.len(), 1);

        // Reading does not consume the payload.
        assert!(store.load_pending_payload("run-1").await.unwrap().is_some());

        store.clear_pending_payload("run-1").await.unwrap();
        assert!(store.load_pending_payload("run-1").await.unwrap().is_none());

        // Clearing twice is fine.
        store.clear_pending_payload("run-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_run() {
        let mut store = MemoryCheckpointStore::new();
        let state = RunState::new("run-1", RunInputs::new("S1"));
        store.save("run-1", &state).await.unwrap();
        store
            .save_pending_payload("run-1", &package("run-1"))
            .await
            .unwrap();

        store.delete_run("run-1").await.unwrap();

        assert!(store.load("run-1").await.unwrap().is_none());
        assert!(store.load_pending_payload("run-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_runs_sorted() {
        let mut store = MemoryCheckpointStore::new();
        for id in ["run-b", "run-a", "run-c"] {
            store
                .save(id, &RunState::new(id, RunInputs::new("S1")))
                .await
                .unwrap();
        }
        assert_eq!(
            store.list_runs().await.unwrap(),
            vec!["run-a", "run-b", "run-c"]
        );
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let mut store = MemoryCheckpointStore::new();
        let other = store.clone();
        store
            .save("run-1", &RunState::new("run-1", RunInputs::new("S1")))
            .await
            .unwrap();
        assert!(other.load("run-1").await.unwrap().is_some());

        other.clear().await;
        assert_eq!(store.run_count().await, 0);
    }

    #[tokio::test]
    async fn test_store_trait_object() {
        let mut store: Box<dyn CheckpointStore> = Box::new(MemoryCheckpointStore::new());
        let state = RunState::new("run-1", RunInputs::new("S1"));

        store.save("run-1", &state).await.unwrap();

        assert!(store.load("run-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let store = MemoryCheckpointStore::new();

        let mut handles = Vec::new();
        for i in 0..10 {
            let mut store = store.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("run-{i}");
                let state = RunState::new(id.clone(), RunInputs::new("S1"));
                store.save(&id, &state).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.run_count().await, 10);
    }
}
