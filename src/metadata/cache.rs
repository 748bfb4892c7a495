//! Per-process cache of scene schemas.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::FieldMetadataModel;
use crate::collaborators::MetadataSource;

/// Caches [`FieldMetadataModel`]s by scene id in front of a
/// [`MetadataSource`].
///
/// Readers share the lock; a miss takes the write lock only to insert.
/// Models are handed out as `Arc`s, so invalidation never tears a model
/// a running step is still reading.
///
/// A failed fetch yields an empty model that is *not* cached, so the next
/// run retries the source.
#[derive(Clone)]
pub struct MetadataCache {
    source: Arc<dyn MetadataSource>,
    entries: Arc<RwLock<HashMap<String, Arc<FieldMetadataModel>>>>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache").finish_non_exhaustive()
    }
}

impl MetadataCache {
    /// Creates an empty cache over `source`.
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self {
            source,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the schema for `scene_id`, fetching it on a miss.
    ///
    /// Never fails: an unavailable schema is returned as an empty model.
    pub async fn load(&self, scene_id: &str) -> Arc<FieldMetadataModel> {
        if let Some(model) = self.entries.read().await.get(scene_id) {
            debug!(scene_id, "field metadata cache hit");
            return Arc::clone(model);
        }

        match self.source.fetch_schema(scene_id).await {
            Ok(mut model) => {
                if model.scene_id.is_empty() {
                    model.scene_id = scene_id.to_string();
                }
                info!(scene_id, fields = model.fields.len(), "fetched field metadata");
                let model = Arc::new(model);
                self.entries
                    .write()
                    .await
                    .insert(scene_id.to_string(), Arc::clone(&model));
                model
            }
            Err(e) => {
                warn!(scene_id, error = %e, degraded = true, "field metadata unavailable");
                Arc::new(FieldMetadataModel::empty(scene_id))
            }
        }
    }

    /// Drops the cached schema for one scene.
    pub async fn invalidate(&self, scene_id: &str) -> bool {
        let removed = self.entries.write().await.remove(scene_id).is_some();
        if removed {
            info!(scene_id, "invalidated field metadata");
        }
        removed
    }

    /// Drops every cached schema.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        info!("cleared field metadata cache");
    }

    /// Scene ids currently cached, sorted.
    pub async fn cached_scenes(&self) -> Vec<String> {
        let mut scenes: Vec<String> = self.entries.read().await.keys().cloned().collect();
        scenes.sort();
        scenes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FieldDefinition;
    use crate::{HeddleError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl MetadataSource for CountingSource {
        async fn fetch_schema(&self, scene_id: &str) -> Result<FieldMetadataModel> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HeddleError::External("metadata service down".to_string()));
            }
            Ok(FieldMetadataModel::new(
                "",
                vec![FieldDefinition::new(format!("{scene_id}-field"), "Field")],
            ))
        }
    }

    #[tokio::test]
    async fn test_load_caches_per_scene() {
        let source = Arc::new(CountingSource::default());
        let cache = MetadataCache::new(source.clone());

        let first = cache.load("a").await;
        let second = cache.load("a").await;
        let other = cache.load("b").await;

        assert_eq!(first.scene_id, "a");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(other.fields[0].field_id, "b-field");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.cached_scenes().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let source = Arc::new(CountingSource::default());
        let cache = MetadataCache::new(source.clone());

        cache.load("a").await;
        assert!(cache.invalidate("a").await);
        assert!(!cache.invalidate("a").await);
        cache.load("a").await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        cache.clear().await;
        assert!(cache.cached_scenes().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_degrades_and_is_not_cached() {
        let source = Arc::new(CountingSource {
            fail: true,
            ..CountingSource::default()
        });
        let cache = MetadataCache::new(source.clone());

        let model = cache.load("a").await;
        assert!(model.is_empty());
        assert_eq!(model.scene_id, "a");

        cache.load("a").await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(cache.cached_scenes().await.is_empty());
    }
}
