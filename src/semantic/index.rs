//! Vector index client.
//!
//! `VectorStore` is the backing-store seam (in-memory or Qdrant);
//! `IndexClient` wraps one collection with dimension checks and per-call
//! timeouts. The collection is ensured on first use and the outcome is
//! cached once it succeeds, so an unreachable store only fails the calls
//! that need it. Every write is an idempotent overwrite keyed by point id,
//! and reads or deletes of missing ids are successful no-ops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::eid::PointId;

/// Denormalized point payload.
pub type Payload = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Cosine,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Cosine => "Cosine",
        }
    }
}

/// One index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: PointId,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// Search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: PointId,
    /// Similarity score, higher is closer
    pub score: f32,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMatch {
    pub key: String,
    pub value: Value,
}

/// Equality conditions over payload fields, all of which must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub must: Vec<FieldMatch>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.must.push(FieldMatch {
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        self.must
            .iter()
            .all(|cond| payload.get(&cond.key) == Some(&cond.value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub dimension: usize,
    pub distance: Distance,
    /// True when `ensure_collection` had to create it
    pub created: bool,
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("vector store unavailable: {0}")]
    Transient(String),

    #[error("vector store call '{op}' timed out after {}ms", .after.as_millis())]
    Timeout { op: &'static str, after: Duration },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("collection '{0}' does not exist")]
    CollectionMissing(String),

    #[error("point not found: {0}")]
    PointMissing(String),

    #[error("vector store rejected request: {0}")]
    Rejected(String),

    #[error("malformed vector store response: {0}")]
    Malformed(String),

    #[error("vector persistence failed: {0}")]
    Storage(String),
}

impl IndexError {
    /// Network failures, timeouts, server-side errors and failed local
    /// writes are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IndexError::Transient(_) | IndexError::Timeout { .. } | IndexError::Storage(_)
        )
    }
}

/// Backing vector store bound to one collection.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if missing. An existing collection with a
    /// different dimension is a `DimensionMismatch`.
    async fn ensure_collection(
        &self,
        dimension: usize,
        distance: Distance,
    ) -> Result<CollectionInfo, IndexError>;

    async fn upsert(&self, points: Vec<Point>) -> Result<(), IndexError>;

    /// Missing ids are skipped.
    async fn retrieve(&self, ids: &[PointId], with_vector: bool) -> Result<Vec<Point>, IndexError>;

    /// Missing ids are skipped.
    async fn delete(&self, ids: &[PointId]) -> Result<(), IndexError>;

    /// Merge `payload` into the payload of existing points.
    async fn set_payload(&self, ids: &[PointId], payload: Payload) -> Result<(), IndexError>;

    async fn search(
        &self,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, IndexError>;

    async fn list_ids(&self) -> Result<Vec<PointId>, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;

    /// Write buffered changes to durable storage.
    async fn flush(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

/// Client for one collection of a vector store.
#[derive(Clone)]
pub struct IndexClient {
    store: Arc<dyn VectorStore>,
    dimension: usize,
    timeout: Duration,
    collection: Arc<OnceCell<CollectionInfo>>,
}

impl IndexClient {
    /// Wrap a store without touching it.
    pub fn new(store: Arc<dyn VectorStore>, dimension: usize, timeout: Duration) -> Self {
        Self {
            store,
            dimension,
            timeout,
            collection: Arc::new(OnceCell::new()),
        }
    }

    /// Wrap a store and make sure its collection exists with `dimension`.
    pub async fn connect(
        store: Arc<dyn VectorStore>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        let client = Self::new(store, dimension, timeout);
        client.ensure_collection().await?;
        Ok(client)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Create the collection if missing. Failures are not cached.
    pub async fn ensure_collection(&self) -> Result<CollectionInfo, IndexError> {
        let info = self
            .collection
            .get_or_try_init(|| async {
                let info = self
                    .call(
                        "ensure_collection",
                        self.store.ensure_collection(self.dimension, Distance::Cosine),
                    )
                    .await?;

                if info.created {
                    log::info!(
                        "created collection with {} dimensions ({})",
                        info.dimension,
                        info.distance.as_str()
                    );
                }
                Ok::<_, IndexError>(info)
            })
            .await?;

        Ok(info.clone())
    }

    async fn ready(&self) -> Result<(), IndexError> {
        self.ensure_collection().await.map(|_| ())
    }

    /// Create or replace a point.
    pub async fn upsert(
        &self,
        id: PointId,
        vector: Vec<f32>,
        payload: Payload,
    ) -> Result<(), IndexError> {
        self.check_dimension(&vector)?;
        self.ready().await?;
        log::debug!("upsert point {id}");
        self.call(
            "upsert",
            self.store.upsert(vec![Point {
                id,
                vector,
                payload,
            }]),
        )
        .await
    }

    pub async fn retrieve(&self, ids: &[PointId]) -> Result<Vec<Point>, IndexError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.ready().await?;
        self.call("retrieve", self.store.retrieve(ids, true)).await
    }

    pub async fn retrieve_one(&self, id: &PointId) -> Result<Option<Point>, IndexError> {
        let points = self.retrieve(std::slice::from_ref(id)).await?;
        Ok(points.into_iter().find(|p| &p.id == id))
    }

    pub async fn exists(&self, id: &PointId) -> Result<bool, IndexError> {
        self.ready().await?;
        let points = self
            .call("retrieve", self.store.retrieve(std::slice::from_ref(id), false))
            .await?;
        Ok(points.iter().any(|p| &p.id == id))
    }

    pub async fn delete(&self, ids: &[PointId]) -> Result<(), IndexError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.ready().await?;
        log::debug!("delete {} point(s)", ids.len());
        self.call("delete", self.store.delete(ids)).await
    }

    pub async fn set_payload(&self, ids: &[PointId], payload: Payload) -> Result<(), IndexError> {
        if ids.is_empty() || payload.is_empty() {
            return Ok(());
        }
        self.ready().await?;
        log::debug!("patch payload of {} point(s)", ids.len());
        self.call("set_payload", self.store.set_payload(ids, payload))
            .await
    }

    /// Rank points by similarity, highest first, after applying `filter`.
    pub async fn search(
        &self,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        self.check_dimension(vector)?;
        if limit == 0 {
            return Ok(vec![]);
        }
        self.ready().await?;
        self.call(
            "search",
            self.store.search(vector, filter, limit, score_threshold),
        )
        .await
    }

    pub async fn list_ids(&self) -> Result<Vec<PointId>, IndexError> {
        self.ready().await?;
        self.call("list_ids", self.store.list_ids()).await
    }

    pub async fn count(&self) -> Result<usize, IndexError> {
        self.ready().await?;
        self.call("count", self.store.count()).await
    }

    /// Persist buffered writes. A no-op until the collection is ready.
    pub async fn flush(&self) -> Result<(), IndexError> {
        if self.collection.get().is_none() {
            return Ok(());
        }
        self.store.flush().await
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        Ok(())
    }

    async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, IndexError>>,
    ) -> Result<T, IndexError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(IndexError::Timeout {
                op,
                after: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::memory::MemoryStore;
    use serde_json::json;

    fn payload(v: Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    async fn client(dimension: usize) -> IndexClient {
        IndexClient::connect(
            Arc::new(MemoryStore::new()),
            dimension,
            Duration::from_secs(1),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_filter_matches_all_conditions() {
        let p = payload(json!({"schema": "X", "type": "sql"}));

        assert!(Filter::new().matches(&p));
        assert!(Filter::new().eq("schema", "X").matches(&p));
        assert!(Filter::new().eq("schema", "X").eq("type", "sql").matches(&p));
        assert!(!Filter::new().eq("schema", "X").eq("type", "chat").matches(&p));
        assert!(!Filter::new().eq("missing", "X").matches(&p));
    }

    #[tokio::test]
    async fn test_upsert_then_retrieve_round_trip() {
        let client = client(3).await;
        let p = payload(json!({"question": "q1", "schema": "X"}));

        client
            .upsert(PointId::Num(1), vec![1.0, 0.0, 0.0], p.clone())
            .await
            .unwrap();

        let point = client.retrieve_one(&PointId::Num(1)).await.unwrap().unwrap();
        assert_eq!(point.payload, p);
        assert_eq!(point.vector, vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_without_duplicates() {
        let client = client(2).await;
        client
            .upsert(PointId::Num(1), vec![1.0, 0.0], payload(json!({"v": 1})))
            .await
            .unwrap();
        client
            .upsert(PointId::Num(1), vec![0.0, 1.0], payload(json!({"v": 2})))
            .await
            .unwrap();

        assert_eq!(client.count().await.unwrap(), 1);
        let point = client.retrieve_one(&PointId::Num(1)).await.unwrap().unwrap();
        assert_eq!(point.payload.get("v"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_missing_ids_are_noops() {
        let client = client(2).await;
        assert!(client.retrieve(&[PointId::Num(9)]).await.unwrap().is_empty());
        client.delete(&[PointId::Num(9)]).await.unwrap();
        client
            .set_payload(&[PointId::Num(9)], payload(json!({"schema": "Y"})))
            .await
            .unwrap();
        assert_eq!(client.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wrong_vector_length_rejected() {
        let client = client(3).await;
        let result = client
            .upsert(PointId::Num(1), vec![1.0, 0.0], Payload::new())
            .await;
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[tokio::test]
    async fn test_reconnect_with_other_dimension_fails() {
        let store: Arc<dyn VectorStore> = Arc::new(MemoryStore::new());
        IndexClient::connect(store.clone(), 3, Duration::from_secs(1))
            .await
            .unwrap();

        let result = IndexClient::connect(store, 4, Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 4, got: 3 })
        ));
    }

    #[tokio::test]
    async fn test_set_payload_merges() {
        let client = client(2).await;
        client
            .upsert(
                PointId::Num(1),
                vec![1.0, 0.0],
                payload(json!({"schema": "X", "question": "q"})),
            )
            .await
            .unwrap();

        client
            .set_payload(&[PointId::Num(1)], payload(json!({"schema": "Y"})))
            .await
            .unwrap();

        let point = client.retrieve_one(&PointId::Num(1)).await.unwrap().unwrap();
        assert_eq!(point.payload, payload(json!({"schema": "Y", "question": "q"})));
        assert_eq!(point.vector, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_search_filter_and_order() {
        let client = client(2).await;
        client
            .upsert(PointId::Num(1), vec![1.0, 0.0], payload(json!({"schema": "X"})))
            .await
            .unwrap();
        client
            .upsert(PointId::Num(2), vec![0.6, 0.8], payload(json!({"schema": "X"})))
            .await
            .unwrap();
        client
            .upsert(PointId::Num(3), vec![0.99, 0.141], payload(json!({"schema": "Y"})))
            .await
            .unwrap();

        let hits = client
            .search(&[1.0, 0.0], &Filter::new().eq("schema", "X"), 10, None)
            .await
            .unwrap();

        let ids: Vec<_> = hits.iter().map(|h| h.id.clone()).collect();
        assert_eq!(ids, vec![PointId::Num(1), PointId::Num(2)]);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_collection_is_ensured_on_first_use() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);
        let client = IndexClient::new(store.clone(), 2, Duration::from_secs(1));

        let err = client.count().await.unwrap_err();
        assert!(err.is_transient());

        store.set_offline(false);
        assert_eq!(client.count().await.unwrap(), 0);
        client
            .upsert(PointId::Num(1), vec![1.0, 0.0], Payload::new())
            .await
            .unwrap();
        assert_eq!(client.count().await.unwrap(), 1);
    }

    #[test]
    fn test_storage_failures_are_transient() {
        assert!(IndexError::Storage("disk full".to_string()).is_transient());
        assert!(!IndexError::PointMissing("1".to_string()).is_transient());
        assert!(!IndexError::CollectionMissing("c".to_string()).is_transient());
    }

    #[tokio::test]
    async fn test_offline_store_is_transient() {
        let store = Arc::new(MemoryStore::new());
        let client = IndexClient::connect(store.clone(), 2, Duration::from_secs(1))
            .await
            .unwrap();

        store.set_offline(true);
        let err = client.count().await.unwrap_err();
        assert!(err.is_transient());
    }
}
