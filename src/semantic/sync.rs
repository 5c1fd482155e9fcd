//! Index synchronizer.
//!
//! Keeps the vector index consistent with the record store: a point exists
//! for a record exactly when its feedback is positive, and indexed points
//! carry the current payload and embedding.
//!
//! ```text
//! Unindexed --feedback→positive-->     Indexed   (upsert)
//! Indexed   --feedback→non-positive--> Unindexed (delete)
//! Indexed   --content edit-->          Indexed   (re-upsert or patch)
//! Unindexed --content edit-->          Unindexed (no-op)
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::eid::RecordId;
use crate::records::{ContentEdit, ConversationRecord, Feedback, RecordField, RecordStore, StoreError};
use crate::semantic::embeddings::{embed_text, Embedder, EmbeddingError};
use crate::semantic::index::{IndexClient, IndexError, Payload};
use crate::semantic::preprocess::{content_hash, embedding_input};

pub const CONTENT_HASH_KEY: &str = "content_hash";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("record {0} not found")]
    NotFound(RecordId),

    #[error("transient failure: {0}")]
    TransientIo(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

impl SyncError {
    /// Worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientIo(_))
    }

    /// Requires an operator to rebuild the collection; never swallowed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::SchemaMismatch(_))
    }
}

impl From<IndexError> for SyncError {
    fn from(e: IndexError) -> Self {
        if e.is_transient() {
            return SyncError::TransientIo(e.to_string());
        }
        match e {
            IndexError::DimensionMismatch { .. } | IndexError::CollectionMissing(_) => {
                SyncError::SchemaMismatch(e.to_string())
            }
            _ => SyncError::Rejected(e.to_string()),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => SyncError::NotFound(id),
            StoreError::Transient(_) | StoreError::Io(_) => SyncError::TransientIo(e.to_string()),
            StoreError::InvalidPageToken(_) | StoreError::Malformed(_) => {
                SyncError::Rejected(e.to_string())
            }
        }
    }
}

/// What a synchronization step did to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Point written with a fresh vector and payload
    Upserted,
    /// Payload fields replaced, vector kept
    Patched,
    Removed,
    /// Nothing to do
    Unchanged,
    /// A non-fatal failure was logged; the index is stale until the next
    /// event or seeder run for this id
    Deferred { reason: String },
}

/// Full denormalized payload of an indexed record.
pub fn build_payload(record: &ConversationRecord, content_hash: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("record_id".to_string(), json!(record.id.as_str()));
    for field in [
        RecordField::Schema,
        RecordField::Question,
        RecordField::Conversation,
        RecordField::Hidden,
        RecordField::Kind,
        RecordField::User,
        RecordField::Timestamp,
    ] {
        let (key, value) = payload_field(record, field);
        payload.insert(key.to_string(), value);
    }
    payload.insert(CONTENT_HASH_KEY.to_string(), json!(content_hash));
    payload
}

fn payload_field(record: &ConversationRecord, field: RecordField) -> (&'static str, Value) {
    match field {
        RecordField::Schema => ("schema", json!(record.schema)),
        RecordField::Question => ("question", json!(record.question)),
        RecordField::Conversation => ("conversation", json!(record.conversation)),
        RecordField::Hidden => ("hidden", json!(record.hidden)),
        RecordField::Kind => ("type", json!(record.kind)),
        RecordField::User => ("user", json!(record.user)),
        RecordField::Timestamp => ("timestamp", json!(record.timestamp.to_rfc3339())),
    }
}

fn payload_patch(record: &ConversationRecord, fields: &BTreeSet<RecordField>) -> Payload {
    fields
        .iter()
        .map(|field| {
            let (key, value) = payload_field(record, *field);
            (key.to_string(), value)
        })
        .collect()
}

pub struct IndexSynchronizer {
    records: Arc<dyn RecordStore>,
    index: IndexClient,
    embedder: Arc<dyn Embedder>,
}

impl IndexSynchronizer {
    pub fn new(
        records: Arc<dyn RecordStore>,
        index: IndexClient,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            records,
            index,
            embedder,
        }
    }

    pub fn index(&self) -> &IndexClient {
        &self.index
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub async fn on_feedback_change(
        &self,
        id: &RecordId,
        feedback: Feedback,
    ) -> Result<SyncOutcome, SyncError> {
        if feedback.is_positive() {
            self.make_positive(id).await
        } else {
            self.remove(id).await
        }
    }

    /// Fetch the record and write its point, replacing any previous one.
    pub async fn make_positive(&self, id: &RecordId) -> Result<SyncOutcome, SyncError> {
        let record = self.records.get_record(id).await?;
        self.index_record(&record).await
    }

    /// Embed and upsert a record that is already in hand.
    pub async fn index_record(&self, record: &ConversationRecord) -> Result<SyncOutcome, SyncError> {
        let input = embedding_input(record);
        let hash = content_hash(&input);
        let vector = embed_text(&self.embedder, &input).await?;

        if vector.len() != self.index.dimension() {
            return Err(SyncError::SchemaMismatch(format!(
                "embedder '{}' produced {} dimensions, collection has {}",
                self.embedder.name(),
                vector.len(),
                self.index.dimension()
            )));
        }

        self.index
            .upsert(record.id.point_id(), vector, build_payload(record, &hash))
            .await?;

        log::debug!("indexed record {}", record.id);
        Ok(SyncOutcome::Upserted)
    }

    /// Delete the point of a record if there is one.
    pub async fn remove(&self, id: &RecordId) -> Result<SyncOutcome, SyncError> {
        let point_id = id.point_id();

        if !self.index.exists(&point_id).await? {
            return Ok(SyncOutcome::Unchanged);
        }

        self.index.delete(&[point_id]).await?;
        log::debug!("removed record {} from index", id);
        Ok(SyncOutcome::Removed)
    }

    /// Bring an indexed point in line with an edited record.
    ///
    /// The record is fetched after the point lookup, so the decision uses
    /// the feedback as it is now. A point whose record is no longer positive
    /// is removed.
    pub async fn on_content_edit(&self, edit: &ContentEdit) -> Result<SyncOutcome, SyncError> {
        if edit.changed_fields.is_empty() {
            return Ok(SyncOutcome::Unchanged);
        }

        let point_id = edit.id.point_id();
        let Some(existing) = self.index.retrieve_one(&point_id).await? else {
            return Ok(SyncOutcome::Unchanged);
        };

        let record = match self.records.get_record(&edit.id).await {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => {
                self.index.delete(&[point_id]).await?;
                return Ok(SyncOutcome::Removed);
            }
            Err(e) => return Err(e.into()),
        };

        if !record.feedback.is_positive() {
            self.index.delete(&[point_id]).await?;
            return Ok(SyncOutcome::Removed);
        }

        if edit.touches_embedding() {
            let hash = content_hash(&embedding_input(&record));
            let stored = existing.payload.get(CONTENT_HASH_KEY).and_then(|v| v.as_str());

            if stored != Some(hash.as_str()) {
                return self.index_record(&record).await;
            }
            log::debug!("record {} content unchanged after normalization", edit.id);
        }

        self.index
            .set_payload(&[point_id], payload_patch(&record, &edit.changed_fields))
            .await?;
        Ok(SyncOutcome::Patched)
    }

    /// Feedback handler for callers whose own mutation already committed.
    /// Only a schema mismatch is returned as an error.
    pub async fn handle_feedback_change(
        &self,
        id: &RecordId,
        feedback: Feedback,
    ) -> Result<SyncOutcome, SyncError> {
        let result = self.on_feedback_change(id, feedback).await;
        Self::settle(id, "feedback change", result)
    }

    /// Content edit handler with the same policy as [`Self::handle_feedback_change`].
    pub async fn handle_content_edit(&self, edit: &ContentEdit) -> Result<SyncOutcome, SyncError> {
        let result = self.on_content_edit(edit).await;
        Self::settle(&edit.id, "content edit", result)
    }

    pub(crate) fn settle(
        id: &RecordId,
        event: &str,
        result: Result<SyncOutcome, SyncError>,
    ) -> Result<SyncOutcome, SyncError> {
        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_fatal() => {
                log::error!("index sync for {id} after {event} failed: {e}");
                Err(e)
            }
            Err(e) => {
                log::warn!("index sync for {id} after {event} deferred: {e}");
                Ok(SyncOutcome::Deferred {
                    reason: e.to_string(),
                })
            }
        }
    }
}
