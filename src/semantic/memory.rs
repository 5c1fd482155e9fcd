//! In-process vector store with cosine similarity search.
//!
//! Keeps points in a map keyed by point id. When opened with a path,
//! mutations only mark the store dirty; `flush` writes the whole collection
//! to `vectors.bin` on the blocking pool.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::eid::PointId;
use crate::semantic::index::{
    CollectionInfo, Distance, Filter, IndexError, Payload, Point, ScoredPoint, VectorStore,
};
use crate::semantic::storage::{VectorStorage, VectorStorageError};

#[derive(Default)]
struct MemoryState {
    /// Fixed once the collection is created
    dimension: Option<usize>,
    entries: HashMap<PointId, Point>,
}

struct Persistence {
    storage: VectorStorage,
    model_id: [u8; 32],
}

/// In-memory vector store.
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    persistence: Option<Persistence>,
    dirty: AtomicBool,
    offline: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty, non-persistent store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            persistence: None,
            dirty: AtomicBool::new(false),
            offline: AtomicBool::new(false),
        }
    }

    /// Open a store persisted at `path`.
    ///
    /// A file written by a different embedder or an older format is
    /// discarded and the store starts empty; a corrupt file is an error.
    pub fn open(path: PathBuf, model_id: [u8; 32]) -> Result<Self, VectorStorageError> {
        let storage = VectorStorage::new(path);

        let mut state = MemoryState::default();
        if storage.exists() {
            match storage.load(&model_id) {
                Ok((dimension, points)) => {
                    log::info!("Loaded {} vectors from storage", points.len());
                    state.dimension = Some(dimension);
                    state.entries = points.into_iter().map(|p| (p.id.clone(), p)).collect();
                }
                Err(VectorStorageError::ModelMismatch) => {
                    log::warn!("Embedding model changed, starting with an empty index");
                }
                Err(VectorStorageError::VersionMismatch(file_ver, _)) => {
                    log::warn!(
                        "Storage version {} unsupported, starting with an empty index",
                        file_ver
                    );
                }
                Err(e) => {
                    log::error!("Failed to load vectors: {}", e);
                    return Err(e);
                }
            }
        } else {
            log::info!("No existing index, starting fresh");
        }

        Ok(Self {
            state: Mutex::new(state),
            persistence: Some(Persistence { storage, model_id }),
            dirty: AtomicBool::new(false),
            offline: AtomicBool::new(false),
        })
    }

    /// Simulate an unreachable store: every call fails transiently.
    #[cfg(test)]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, IndexError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(IndexError::Transient("connection refused".to_string()));
        }
        self.state
            .lock()
            .map_err(|e| IndexError::Storage(format!("Lock poisoned: {}", e)))
    }

    fn require_dimension(state: &MemoryState) -> Result<usize, IndexError> {
        state
            .dimension
            .ok_or_else(|| IndexError::CollectionMissing("memory".to_string()))
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// True when there are changes not yet written to disk.
    pub fn is_dirty(&self) -> bool {
        self.persistence.is_some() && self.dirty.load(Ordering::SeqCst)
    }

    /// Compute L2 norm of a vector.
    fn l2_norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Compute cosine similarity between two vectors.
    /// Assumes query_norm is precomputed for efficiency.
    fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
        let target_norm = Self::l2_norm(target);
        if target_norm < f32::EPSILON || query_norm < f32::EPSILON {
            return 0.0;
        }

        let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
        dot_product / (query_norm * target_norm)
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(
        &self,
        dimension: usize,
        distance: Distance,
    ) -> Result<CollectionInfo, IndexError> {
        let mut state = self.lock()?;

        match state.dimension {
            Some(existing) if existing != dimension => Err(IndexError::DimensionMismatch {
                expected: dimension,
                got: existing,
            }),
            Some(existing) => Ok(CollectionInfo {
                dimension: existing,
                distance,
                created: false,
            }),
            None => {
                state.dimension = Some(dimension);
                self.mark_dirty();
                Ok(CollectionInfo {
                    dimension,
                    distance,
                    created: true,
                })
            }
        }
    }

    async fn upsert(&self, points: Vec<Point>) -> Result<(), IndexError> {
        let mut state = self.lock()?;
        let dimension = Self::require_dimension(&state)?;

        for point in &points {
            if point.vector.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    got: point.vector.len(),
                });
            }
        }

        for point in points {
            state.entries.insert(point.id.clone(), point);
        }

        self.mark_dirty();
        Ok(())
    }

    async fn retrieve(&self, ids: &[PointId], with_vector: bool) -> Result<Vec<Point>, IndexError> {
        let state = self.lock()?;
        Self::require_dimension(&state)?;

        Ok(ids
            .iter()
            .filter_map(|id| state.entries.get(id))
            .map(|p| Point {
                id: p.id.clone(),
                vector: if with_vector { p.vector.clone() } else { vec![] },
                payload: p.payload.clone(),
            })
            .collect())
    }

    async fn delete(&self, ids: &[PointId]) -> Result<(), IndexError> {
        let mut state = self.lock()?;
        Self::require_dimension(&state)?;

        let mut removed = false;
        for id in ids {
            removed |= state.entries.remove(id).is_some();
        }

        if removed {
            self.mark_dirty();
        }
        Ok(())
    }

    async fn set_payload(&self, ids: &[PointId], payload: Payload) -> Result<(), IndexError> {
        let mut state = self.lock()?;
        Self::require_dimension(&state)?;

        let mut touched = false;
        for id in ids {
            if let Some(point) = state.entries.get_mut(id) {
                for (key, value) in &payload {
                    point.payload.insert(key.clone(), value.clone());
                }
                touched = true;
            }
        }

        if touched {
            self.mark_dirty();
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        let state = self.lock()?;
        let dimension = Self::require_dimension(&state)?;

        if vector.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                got: vector.len(),
            });
        }

        let query_norm = Self::l2_norm(vector);

        let mut results: Vec<ScoredPoint> = state
            .entries
            .values()
            .filter(|p| filter.matches(&p.payload))
            .filter_map(|p| {
                let score = Self::cosine_similarity(vector, &p.vector, query_norm);
                match score_threshold {
                    Some(threshold) if score < threshold => None,
                    _ => Some(ScoredPoint {
                        id: p.id.clone(),
                        score,
                        payload: p.payload.clone(),
                    }),
                }
            })
            .collect();

        // Sort by score descending
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        results.truncate(limit);

        Ok(results)
    }

    async fn list_ids(&self) -> Result<Vec<PointId>, IndexError> {
        let state = self.lock()?;
        Self::require_dimension(&state)?;
        Ok(state.entries.keys().cloned().collect())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let state = self.lock()?;
        Self::require_dimension(&state)?;
        Ok(state.entries.len())
    }

    async fn flush(&self) -> Result<(), IndexError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let snapshot = {
            let state = self.lock()?;
            state
                .dimension
                .map(|dimension| (dimension, state.entries.values().cloned().collect::<Vec<_>>()))
        };
        let Some((dimension, points)) = snapshot else {
            return Ok(());
        };

        let storage = VectorStorage::new(persistence.storage.path().to_path_buf());
        let model_id = persistence.model_id;
        let count = points.len();

        let saved = tokio::task::spawn_blocking(move || {
            storage.save(dimension, points.iter(), &model_id)
        })
        .await
        .map_err(|e| IndexError::Storage(format!("persist task failed: {e}")))
        .and_then(|r| r.map_err(|e| IndexError::Storage(e.to_string())));

        match saved {
            Ok(()) => {
                log::debug!("persisted {} vectors", count);
                Ok(())
            }
            Err(e) => {
                self.mark_dirty();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(id: u64, vector: Vec<f32>, schema: &str) -> Point {
        Point {
            id: PointId::Num(id),
            vector,
            payload: json!({ "schema": schema }).as_object().cloned().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_upsert_requires_collection() {
        let store = MemoryStore::new();
        let result = store.upsert(vec![point(1, vec![1.0, 0.0], "X")]).await;
        assert!(matches!(result, Err(IndexError::CollectionMissing(_))));
    }

    #[tokio::test]
    async fn test_search_with_threshold_and_limit() {
        let store = MemoryStore::new();
        store.ensure_collection(3, Distance::Cosine).await.unwrap();

        for i in 0..10u64 {
            store
                .upsert(vec![point(i, vec![1.0, i as f32 * 0.1, 0.0], "X")])
                .await
                .unwrap();
        }
        store
            .upsert(vec![point(100, vec![0.0, 0.0, 1.0], "X")])
            .await
            .unwrap();

        let limited = store
            .search(&[1.0, 0.0, 0.0], &Filter::new(), 3, None)
            .await
            .unwrap();
        assert_eq!(limited.len(), 3);
        assert_eq!(limited[0].id, PointId::Num(0));

        let thresholded = store
            .search(&[0.0, 0.0, 1.0], &Filter::new(), 20, Some(0.9))
            .await
            .unwrap();
        assert_eq!(thresholded.len(), 1);
        assert_eq!(thresholded[0].id, PointId::Num(100));
    }

    #[tokio::test]
    async fn test_persisted_store_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");
        let model_id = [7u8; 32];

        {
            let store = MemoryStore::open(path.clone(), model_id).unwrap();
            store.ensure_collection(2, Distance::Cosine).await.unwrap();
            store.upsert(vec![point(1, vec![1.0, 0.0], "X")]).await.unwrap();
            store.upsert(vec![point(2, vec![0.0, 1.0], "Y")]).await.unwrap();
            store.delete(&[PointId::Num(2)]).await.unwrap();
            store.flush().await.unwrap();
        }

        let reopened = MemoryStore::open(path, model_id).unwrap();
        let info = reopened.ensure_collection(2, Distance::Cosine).await.unwrap();
        assert!(!info.created);
        assert_eq!(reopened.count().await.unwrap(), 1);

        let points = reopened.retrieve(&[PointId::Num(1)], true).await.unwrap();
        assert_eq!(points[0].payload.get("schema"), Some(&json!("X")));
    }

    #[tokio::test]
    async fn test_model_change_starts_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");

        {
            let store = MemoryStore::open(path.clone(), [1u8; 32]).unwrap();
            store.ensure_collection(2, Distance::Cosine).await.unwrap();
            store.upsert(vec![point(1, vec![1.0, 0.0], "X")]).await.unwrap();
            store.flush().await.unwrap();
        }

        let store = MemoryStore::open(path, [2u8; 32]).unwrap();
        let info = store.ensure_collection(4, Distance::Cosine).await.unwrap();
        assert!(info.created);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mutations_write_only_on_flush() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.bin");

        let store = MemoryStore::open(path.clone(), [3u8; 32]).unwrap();
        store.ensure_collection(2, Distance::Cosine).await.unwrap();
        for i in 0..20u64 {
            store.upsert(vec![point(i, vec![1.0, 0.0], "X")]).await.unwrap();
        }

        assert!(store.is_dirty());
        assert!(!path.exists());

        store.flush().await.unwrap();
        assert!(!store.is_dirty());
        let written = std::fs::metadata(&path).unwrap().modified().unwrap();

        // nothing changed, nothing rewritten
        store.flush().await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), written);

        let reopened = MemoryStore::open(path, [3u8; 32]).unwrap();
        reopened.ensure_collection(2, Distance::Cosine).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 20);
    }
}
