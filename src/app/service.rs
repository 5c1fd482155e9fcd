use std::sync::Arc;

use serde::Serialize;

use crate::{
    app::errors::AppError,
    config::Config,
    eid::RecordId,
    records::{ContentEdit, ConversationRecord, Feedback, FeedbackTransition, JsonRecordStore, RecordUpdate},
    semantic::{
        BulkSeeder, ConversationSummary, IndexSynchronizer, SearchFilters, SimilaritySearch,
        SyncEvent, SyncQueue,
    },
};

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub records: usize,
    pub positive_records: usize,
    /// `None` when the vector store cannot be reached
    pub indexed_points: Option<usize>,
    pub backend: String,
    pub collection: String,
    pub embedder: String,
    pub dimensions: usize,
}

/// Consumer-facing operations: every mutation commits to the record store
/// first and hands index synchronization to the sync queue.
pub struct AppService {
    config: Config,
    records: Arc<JsonRecordStore>,
    sync: Arc<IndexSynchronizer>,
    search: SimilaritySearch,
    queue: SyncQueue,
    embedder_name: String,
}

impl AppService {
    pub fn new(
        config: Config,
        records: Arc<JsonRecordStore>,
        sync: Arc<IndexSynchronizer>,
        search: SimilaritySearch,
        embedder_name: String,
    ) -> Self {
        let queue = SyncQueue::start(sync.clone(), &config.sync);
        Self {
            config,
            records,
            sync,
            search,
            queue,
            embedder_name,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_feedback(
        &self,
        id: &RecordId,
        feedback: Feedback,
    ) -> Result<FeedbackTransition, AppError> {
        let transition = self.records.set_feedback(id, feedback)?;

        self.queue.submit(SyncEvent::Feedback {
            id: id.clone(),
            feedback,
        })?;

        Ok(transition)
    }

    pub fn edit_record(
        &self,
        id: &RecordId,
        update: RecordUpdate,
    ) -> Result<(ConversationRecord, ContentEdit), AppError> {
        let (record, edit) = self.records.update(id, update)?;

        if !edit.changed_fields.is_empty() {
            self.queue.submit(SyncEvent::Edit(edit.clone()))?;
        }

        Ok((record, edit))
    }

    /// Insert or replace records. Records that arrive positive are queued
    /// for indexing, others for removal of any stale point.
    pub fn import(&self, records: Vec<ConversationRecord>) -> Result<usize, AppError> {
        let events = records
            .iter()
            .map(|r| SyncEvent::Feedback {
                id: r.id.clone(),
                feedback: r.feedback,
            })
            .collect::<Vec<_>>();

        let count = self.records.import(records)?;
        for event in events {
            self.queue.submit(event)?;
        }

        Ok(count)
    }

    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<Vec<ConversationSummary>, AppError> {
        let limit = limit.unwrap_or(self.config.search.default_limit);
        let min_score = min_score.or(self.config.search.min_score);

        Ok(self.search.search(query, filters, limit, min_score).await?)
    }

    /// Number of records a seeder run will scan.
    pub fn record_count(&self, positive_only: bool) -> usize {
        if positive_only {
            self.records.positive_total()
        } else {
            self.records.total()
        }
    }

    pub fn seeder(&self) -> BulkSeeder {
        BulkSeeder::new(self.sync.clone())
    }

    pub async fn status(&self) -> Result<Status, AppError> {
        let index = self.sync.index();

        let indexed_points = match index.count().await {
            Ok(count) => Some(count),
            Err(e) if e.is_transient() => {
                log::warn!("could not count indexed points: {}", e);
                None
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Status {
            records: self.records.total(),
            positive_records: self.records.positive_total(),
            indexed_points,
            backend: format!("{:?}", self.config.index.backend).to_lowercase(),
            collection: self.config.index.collection.clone(),
            embedder: self.embedder_name.clone(),
            dimensions: index.dimension(),
        })
    }

    /// Wait until queued index updates are applied. Reports a schema
    /// mismatch seen by any queued update.
    pub async fn flush(&self) -> Result<(), AppError> {
        Ok(self.queue.flush().await?)
    }

    pub async fn shutdown(self) -> Result<(), AppError> {
        Ok(self.queue.shutdown().await?)
    }
}
