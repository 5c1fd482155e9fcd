//! Qdrant backend over its REST API.
//!
//! Every response arrives in a `{"result": ..., "status": ...}` envelope.
//! Writes use `wait=true` so an acknowledged call is visible to the next
//! read.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{json, Value};

use crate::config::IndexConfig;
use crate::eid::PointId;
use crate::semantic::index::{
    CollectionInfo, Distance, Filter, IndexError, Payload, Point, ScoredPoint, VectorStore,
};

/// Payload fields that get a keyword index for filtered search
const INDEXED_FIELDS: &[&str] = &["schema", "type"];

const SCROLL_PAGE_SIZE: usize = 256;

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(config: &IndexConfig) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| IndexError::Rejected(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, path)
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    /// Send a request and unwrap the `result` field of the response.
    async fn send(&self, request: RequestBuilder) -> Result<Value, IndexError> {
        let response = self
            .with_auth(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(map_status(status, &self.collection, &body));
        }

        let mut envelope: Value = serde_json::from_str(&body)
            .map_err(|e| IndexError::Malformed(format!("{e}: {body}")))?;

        Ok(envelope
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    async fn create_collection(&self, dimension: usize, distance: Distance) -> Result<(), IndexError> {
        self.send(
            self.client
                .put(self.url(""))
                .json(&create_collection_body(dimension, distance)),
        )
        .await?;

        for field in INDEXED_FIELDS {
            self.send(
                self.client
                    .put(self.url("/index?wait=true"))
                    .json(&json!({ "field_name": field, "field_schema": "keyword" })),
            )
            .await?;
        }

        Ok(())
    }
}

fn map_transport_error(e: reqwest::Error) -> IndexError {
    if e.is_decode() {
        IndexError::Malformed(e.to_string())
    } else {
        IndexError::Transient(e.to_string())
    }
}

fn map_status(status: StatusCode, collection: &str, body: &str) -> IndexError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        IndexError::Transient(format!("{status}: {body}"))
    } else if status == StatusCode::NOT_FOUND && body.contains("No point with id") {
        IndexError::PointMissing(body.to_string())
    } else if status == StatusCode::NOT_FOUND {
        IndexError::CollectionMissing(collection.to_string())
    } else {
        IndexError::Rejected(format!("{status}: {body}"))
    }
}

fn create_collection_body(dimension: usize, distance: Distance) -> Value {
    json!({
        "vectors": {
            "size": dimension,
            "distance": distance.as_str(),
        }
    })
}

fn filter_body(filter: &Filter) -> Option<Value> {
    if filter.is_empty() {
        return None;
    }

    let must = filter
        .must
        .iter()
        .map(|cond| json!({ "key": cond.key, "match": { "value": cond.value } }))
        .collect::<Vec<_>>();

    Some(json!({ "must": must }))
}

fn search_body(
    vector: &[f32],
    filter: &Filter,
    limit: usize,
    score_threshold: Option<f32>,
) -> Value {
    let mut body = json!({
        "vector": vector,
        "limit": limit,
        "with_payload": true,
    });

    if let Some(filter) = filter_body(filter) {
        body["filter"] = filter;
    }
    if let Some(threshold) = score_threshold {
        body["score_threshold"] = json!(threshold);
    }

    body
}

fn upsert_body(points: &[Point]) -> Value {
    let points = points
        .iter()
        .map(|p| json!({ "id": p.id, "vector": p.vector, "payload": p.payload }))
        .collect::<Vec<_>>();

    json!({ "points": points })
}

fn parse_point_id(value: &Value) -> Result<PointId, IndexError> {
    serde_json::from_value(value.clone())
        .map_err(|_| IndexError::Malformed(format!("unexpected point id {value}")))
}

fn parse_payload(value: Option<&Value>) -> Payload {
    value
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default()
}

fn parse_vector(value: Option<&Value>) -> Result<Vec<f32>, IndexError> {
    match value {
        None | Some(Value::Null) => Ok(vec![]),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| IndexError::Malformed(format!("bad vector: {e}"))),
    }
}

fn parse_points(result: &Value) -> Result<Vec<Point>, IndexError> {
    let items = result
        .as_array()
        .ok_or_else(|| IndexError::Malformed(format!("expected point list, got {result}")))?;

    items
        .iter()
        .map(|item| {
            Ok(Point {
                id: parse_point_id(&item["id"])?,
                vector: parse_vector(item.get("vector"))?,
                payload: parse_payload(item.get("payload")),
            })
        })
        .collect()
}

fn parse_scored_points(result: &Value) -> Result<Vec<ScoredPoint>, IndexError> {
    let items = result
        .as_array()
        .ok_or_else(|| IndexError::Malformed(format!("expected hit list, got {result}")))?;

    items
        .iter()
        .map(|item| {
            let score = item["score"]
                .as_f64()
                .ok_or_else(|| IndexError::Malformed(format!("hit without score: {item}")))?;
            Ok(ScoredPoint {
                id: parse_point_id(&item["id"])?,
                score: score as f32,
                payload: parse_payload(item.get("payload")),
            })
        })
        .collect()
}

fn parse_collection_dimension(result: &Value) -> Result<usize, IndexError> {
    result["config"]["params"]["vectors"]["size"]
        .as_u64()
        .map(|size| size as usize)
        .ok_or_else(|| IndexError::Malformed(format!("collection info without size: {result}")))
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(
        &self,
        dimension: usize,
        distance: Distance,
    ) -> Result<CollectionInfo, IndexError> {
        match self.send(self.client.get(self.url(""))).await {
            Ok(result) => {
                let existing = parse_collection_dimension(&result)?;
                if existing != dimension {
                    return Err(IndexError::DimensionMismatch {
                        expected: dimension,
                        got: existing,
                    });
                }
                Ok(CollectionInfo {
                    dimension,
                    distance,
                    created: false,
                })
            }
            Err(IndexError::CollectionMissing(_)) => {
                log::info!("creating qdrant collection '{}'", self.collection);
                self.create_collection(dimension, distance).await?;
                Ok(CollectionInfo {
                    dimension,
                    distance,
                    created: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn upsert(&self, points: Vec<Point>) -> Result<(), IndexError> {
        self.send(
            self.client
                .put(self.url("/points?wait=true"))
                .json(&upsert_body(&points)),
        )
        .await?;
        Ok(())
    }

    async fn retrieve(&self, ids: &[PointId], with_vector: bool) -> Result<Vec<Point>, IndexError> {
        let result = self
            .send(self.client.post(self.url("/points")).json(&json!({
                "ids": ids,
                "with_payload": true,
                "with_vector": with_vector,
            })))
            .await?;

        parse_points(&result)
    }

    async fn delete(&self, ids: &[PointId]) -> Result<(), IndexError> {
        self.send(
            self.client
                .post(self.url("/points/delete?wait=true"))
                .json(&json!({ "points": ids })),
        )
        .await?;
        Ok(())
    }

    async fn set_payload(&self, ids: &[PointId], payload: Payload) -> Result<(), IndexError> {
        let result = self
            .send(
                self.client
                    .post(self.url("/points/payload?wait=true"))
                    .json(&json!({ "payload": payload, "points": ids })),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            // point deleted concurrently
            Err(IndexError::PointMissing(body)) => {
                log::debug!("payload patch skipped missing point: {body}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        let result = self
            .send(
                self.client
                    .post(self.url("/points/search"))
                    .json(&search_body(vector, filter, limit, score_threshold)),
            )
            .await?;

        parse_scored_points(&result)
    }

    async fn list_ids(&self) -> Result<Vec<PointId>, IndexError> {
        let mut ids = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE_SIZE,
                "with_payload": false,
                "with_vector": false,
            });
            if let Some(offset) = offset.take() {
                body["offset"] = offset;
            }

            let result = self
                .send(self.client.post(self.url("/points/scroll")).json(&body))
                .await?;

            for point in parse_points(&result["points"])? {
                ids.push(point.id);
            }

            match result.get("next_page_offset") {
                Some(next) if !next.is_null() => offset = Some(next.clone()),
                _ => break,
            }
        }

        Ok(ids)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let result = self
            .send(
                self.client
                    .post(self.url("/points/count"))
                    .json(&json!({ "exact": true })),
            )
            .await?;

        result["count"]
            .as_u64()
            .map(|c| c as usize)
            .ok_or_else(|| IndexError::Malformed(format!("count response without count: {result}")))
    }
}
