//! Similarity search over indexed conversations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::eid::PointId;
use crate::semantic::embeddings::{embed_text, Embedder, EmbeddingError};
use crate::semantic::index::{Filter, IndexClient, IndexError, Payload, ScoredPoint};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The index could not be queried; distinct from an empty result.
    #[error("search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

impl From<IndexError> for SearchError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::DimensionMismatch { .. } | IndexError::CollectionMissing(_) => {
                SearchError::SchemaMismatch(e.to_string())
            }
            _ => SearchError::SearchUnavailable(e.to_string()),
        }
    }
}

/// Equality filters; unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub schema: Option<String>,
    pub kind: Option<String>,
}

impl SearchFilters {
    fn to_filter(&self) -> Filter {
        let mut filter = Filter::new();
        if let Some(schema) = &self.schema {
            filter = filter.eq("schema", schema.as_str());
        }
        if let Some(kind) = &self.kind {
            filter = filter.eq("type", kind.as_str());
        }
        filter
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub score: f32,
    pub schema: String,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub user: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub hidden: bool,
}

impl ConversationSummary {
    fn from_hit(hit: ScoredPoint) -> Self {
        let text = |payload: &Payload, key: &str| {
            payload
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let id = match hit.payload.get("record_id").and_then(|v| v.as_str()) {
            Some(record_id) => record_id.to_string(),
            None => match &hit.id {
                PointId::Num(n) => n.to_string(),
                PointId::Uuid(u) => u.clone(),
            },
        };

        Self {
            id,
            score: hit.score,
            schema: text(&hit.payload, "schema"),
            question: text(&hit.payload, "question"),
            timestamp: hit
                .payload
                .get("timestamp")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc)),
            user: text(&hit.payload, "user"),
            kind: hit
                .payload
                .get("type")
                .and_then(|v| v.as_str())
                .map(String::from),
            hidden: hit
                .payload
                .get("hidden")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        }
    }
}

pub struct SimilaritySearch {
    index: IndexClient,
    embedder: Arc<dyn Embedder>,
}

impl SimilaritySearch {
    pub fn new(index: IndexClient, embedder: Arc<dyn Embedder>) -> Self {
        Self { index, embedder }
    }

    /// Rank indexed conversations by similarity to `query`, highest first.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<ConversationSummary>, SearchError> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let vector = embed_text(&self.embedder, query).await?;

        let hits = self
            .index
            .search(&vector, &filters.to_filter(), limit, min_score)
            .await
            .inspect_err(|e| log::error!("search for {:?} failed: {}", query, e))?;

        log::debug!("search for {:?} returned {} hits", query, hits.len());

        Ok(hits.into_iter().map(ConversationSummary::from_hit).collect())
    }
}
