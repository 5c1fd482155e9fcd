use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use crate::eid::RecordId;
use crate::records::{ConversationRecord, Feedback, JsonRecordStore, Message};
use crate::semantic::embeddings::{Embedder, EmbeddingError, HashEmbedder};
use crate::semantic::index::{IndexClient, Point};
use crate::semantic::{IndexSynchronizer, MemoryStore};

pub const DIMENSIONS: usize = 64;

pub struct Fixture {
    // keeps the record store directory alive
    pub _tmp: TempDir,
    pub records: Arc<JsonRecordStore>,
    pub store: Arc<MemoryStore>,
    pub index: IndexClient,
    pub sync: Arc<IndexSynchronizer>,
}

impl Fixture {
    pub async fn new(records: Vec<ConversationRecord>) -> Self {
        Self::with_embedder(records, Arc::new(HashEmbedder::new(DIMENSIONS)), DIMENSIONS).await
    }

    pub async fn with_embedder(
        records: Vec<ConversationRecord>,
        embedder: Arc<dyn Embedder>,
        dimension: usize,
    ) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let store_records = Arc::new(JsonRecordStore::load(tmp.path()).unwrap());
        store_records.import(records).unwrap();

        let store = Arc::new(MemoryStore::new());
        let index = IndexClient::connect(store.clone(), dimension, Duration::from_secs(2))
            .await
            .unwrap();

        let sync = Arc::new(IndexSynchronizer::new(
            store_records.clone(),
            index.clone(),
            embedder,
        ));

        Self {
            _tmp: tmp,
            records: store_records,
            store,
            index,
            sync,
        }
    }

    pub async fn point(&self, id: &str) -> Option<Point> {
        self.index
            .retrieve_one(&RecordId::from(id).point_id())
            .await
            .unwrap()
    }

    pub async fn count(&self) -> usize {
        self.index.count().await.unwrap()
    }

    /// Every indexed point, ordered by id.
    pub async fn snapshot(&self) -> Vec<Point> {
        let ids = self.index.list_ids().await.unwrap();
        let mut points = self.index.retrieve(&ids).await.unwrap();
        points.sort_by_key(|p| p.id.to_string());
        points
    }
}

pub fn record(id: &str, schema: &str, question: &str, feedback: Feedback) -> ConversationRecord {
    ConversationRecord {
        id: RecordId::from(id),
        schema: schema.to_string(),
        question: question.to_string(),
        conversation: vec![
            Message::new("user", question),
            Message::new("assistant", &format!("answer about {question}")),
        ],
        feedback,
        hidden: false,
        user: "ayse".to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
        kind: Some("chat".to_string()),
    }
}

/// Hash embedder that fails for any text containing `poison`.
pub struct FlakyEmbedder {
    inner: HashEmbedder,
    poison: &'static str,
}

impl FlakyEmbedder {
    pub fn new(poison: &'static str) -> Self {
        Self {
            inner: HashEmbedder::new(DIMENSIONS),
            poison,
        }
    }
}

impl Embedder for FlakyEmbedder {
    fn name(&self) -> &str {
        "flaky"
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.contains(self.poison) {
            return Err(EmbeddingError::EmbeddingFailed("poisoned input".to_string()));
        }
        self.inner.embed(text)
    }
}
