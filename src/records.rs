use crate::eid::RecordId;
use crate::storage::{BackendLocal, StorageManager};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    path::Path,
    str::FromStr,
    sync::{Arc, RwLock},
    time::Instant,
};

pub const RECORDS_FILE: &str = "records.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Positive,
    Negative,
    #[default]
    #[serde(rename = "none")]
    Unset,
}

impl Feedback {
    pub fn is_positive(&self) -> bool {
        matches!(self, Feedback::Positive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feedback::Positive => "positive",
            Feedback::Negative => "negative",
            Feedback::Unset => "none",
        }
    }
}

impl FromStr for Feedback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "positive" | "+" | "up" => Ok(Feedback::Positive),
            "negative" | "-" | "down" => Ok(Feedback::Negative),
            "none" | "" => Ok(Feedback::Unset),
            other => Err(format!(
                "unknown feedback '{other}', expected positive, negative or none"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub message: String,
}

impl Message {
    pub fn new(role: &str, message: &str) -> Self {
        Self {
            role: role.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: RecordId,

    /// Category tag
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub conversation: Vec<Message>,
    #[serde(default)]
    pub feedback: Feedback,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub user: String,
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl PartialEq for ConversationRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Record fields that an edit can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordField {
    Schema,
    Question,
    Conversation,
    Hidden,
    #[serde(rename = "type")]
    Kind,
    User,
    Timestamp,
}

impl RecordField {
    /// Fields that feed the embedding input. Changing one of them requires
    /// re-embedding; every other field only needs a payload patch.
    pub fn affects_embedding(&self) -> bool {
        matches!(self, RecordField::Question | RecordField::Conversation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackTransition {
    pub id: RecordId,
    pub old_feedback: Feedback,
    pub new_feedback: Feedback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEdit {
    pub id: RecordId,
    pub changed_fields: BTreeSet<RecordField>,
}

impl ContentEdit {
    pub fn touches_embedding(&self) -> bool {
        self.changed_fields.iter().any(|f| f.affects_embedding())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecordUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<Vec<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl RecordUpdate {
    pub fn is_empty(&self) -> bool {
        self.schema.is_none()
            && self.question.is_none()
            && self.conversation.is_none()
            && self.hidden.is_none()
            && self.kind.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<ConversationRecord>,
    /// Token of the following page, `None` once the scan is complete
    pub next_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(RecordId),

    #[error("primary store unavailable: {0}")]
    Transient(String),

    #[error("invalid page token '{0}'")]
    InvalidPageToken(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record data: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Read side of the primary store used by the index subsystem.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, id: &RecordId) -> Result<ConversationRecord, StoreError>;

    /// Scan every record, `page_size` at a time.
    async fn list_records(
        &self,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<RecordPage, StoreError>;

    async fn list_positive_records(
        &self,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<RecordPage, StoreError>;
}

/// Primary store kept as a JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    list: Arc<RwLock<Vec<ConversationRecord>>>,
    store: BackendLocal,
}

fn parse_offset(page_token: Option<&str>) -> Result<usize, StoreError> {
    match page_token {
        None => Ok(0),
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| StoreError::InvalidPageToken(token.to_string())),
    }
}

fn page_of(records: Vec<ConversationRecord>, offset: usize, page_size: usize) -> RecordPage {
    let total = records.len();
    let page_size = page_size.max(1);
    let end = offset.saturating_add(page_size).min(total);

    let page = records
        .into_iter()
        .skip(offset)
        .take(page_size)
        .collect::<Vec<_>>();

    RecordPage {
        records: page,
        next_token: (end < total).then(|| end.to_string()),
    }
}

impl JsonRecordStore {
    pub fn load(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = BackendLocal::new(base_dir.as_ref())?;

        if !store.exists(RECORDS_FILE) {
            log::info!(
                "Creating new record store at {}",
                store.base_dir.join(RECORDS_FILE).display()
            );
            store.write(RECORDS_FILE, b"[]")?;
        }

        let now = Instant::now();
        let records: Vec<ConversationRecord> = serde_json::from_slice(&store.read(RECORDS_FILE)?)?;

        log::debug!(
            "took {}ms to read {} records",
            now.elapsed().as_micros() as f64 / 1000.0,
            records.len()
        );

        Ok(Self {
            list: Arc::new(RwLock::new(records)),
            store,
        })
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let data = {
            let records = self.list.read().unwrap_or_else(|e| e.into_inner());
            serde_json::to_vec_pretty(&*records)?
        };
        self.store.write(RECORDS_FILE, &data)?;
        Ok(())
    }

    fn snapshot(&self) -> Vec<ConversationRecord> {
        self.list.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn total(&self) -> usize {
        self.list.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn positive_total(&self) -> usize {
        self.list
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.feedback.is_positive())
            .count()
    }

    /// Insert new records or replace existing ones with the same id.
    /// Returns the number of records written.
    pub fn import(&self, records: Vec<ConversationRecord>) -> Result<usize, StoreError> {
        let count = records.len();
        {
            let mut list = self.list.write().unwrap_or_else(|e| e.into_inner());
            for record in records {
                match list.iter().position(|r| r.id == record.id) {
                    Some(idx) => list[idx] = record,
                    None => list.push(record),
                }
            }
        }
        self.save()?;
        Ok(count)
    }

    /// Set feedback on a record and return the transition that happened.
    pub fn set_feedback(
        &self,
        id: &RecordId,
        feedback: Feedback,
    ) -> Result<FeedbackTransition, StoreError> {
        let old_feedback = {
            let mut list = self.list.write().unwrap_or_else(|e| e.into_inner());
            let record = list
                .iter_mut()
                .find(|r| &r.id == id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;

            std::mem::replace(&mut record.feedback, feedback)
        };

        self.save()?;

        Ok(FeedbackTransition {
            id: id.clone(),
            old_feedback,
            new_feedback: feedback,
        })
    }

    /// Apply an edit and report which fields actually changed.
    pub fn update(
        &self,
        id: &RecordId,
        update: RecordUpdate,
    ) -> Result<(ConversationRecord, ContentEdit), StoreError> {
        let mut changed_fields = BTreeSet::new();

        let result = {
            let mut list = self.list.write().unwrap_or_else(|e| e.into_inner());
            let record = list
                .iter_mut()
                .find(|r| &r.id == id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;

            if let Some(schema) = update.schema {
                if record.schema != schema {
                    record.schema = schema;
                    changed_fields.insert(RecordField::Schema);
                }
            }
            if let Some(question) = update.question {
                if record.question != question {
                    record.question = question;
                    changed_fields.insert(RecordField::Question);
                }
            }
            if let Some(conversation) = update.conversation {
                if record.conversation != conversation {
                    record.conversation = conversation;
                    changed_fields.insert(RecordField::Conversation);
                }
            }
            if let Some(hidden) = update.hidden {
                if record.hidden != hidden {
                    record.hidden = hidden;
                    changed_fields.insert(RecordField::Hidden);
                }
            }
            if let Some(kind) = update.kind {
                if record.kind.as_deref() != Some(kind.as_str()) {
                    record.kind = Some(kind);
                    changed_fields.insert(RecordField::Kind);
                }
            }

            record.clone()
        };

        if !changed_fields.is_empty() {
            self.save()?;
        }

        Ok((
            result,
            ContentEdit {
                id: id.clone(),
                changed_fields,
            },
        ))
    }

    #[cfg(test)]
    pub fn remove(&self, id: &RecordId) -> Result<(), StoreError> {
        self.list
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|r| &r.id != id);
        self.save()
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn get_record(&self, id: &RecordId) -> Result<ConversationRecord, StoreError> {
        self.list
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn list_records(
        &self,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<RecordPage, StoreError> {
        let offset = parse_offset(page_token)?;
        Ok(page_of(self.snapshot(), offset, page_size))
    }

    async fn list_positive_records(
        &self,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<RecordPage, StoreError> {
        let offset = parse_offset(page_token)?;
        let positive = self
            .snapshot()
            .into_iter()
            .filter(|r| r.feedback.is_positive())
            .collect();
        Ok(page_of(positive, offset, page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_parse() {
        assert_eq!("positive".parse::<Feedback>().unwrap(), Feedback::Positive);
        assert_eq!("NEGATIVE".parse::<Feedback>().unwrap(), Feedback::Negative);
        assert_eq!("none".parse::<Feedback>().unwrap(), Feedback::Unset);
        assert!("meh".parse::<Feedback>().is_err());
    }

    #[test]
    fn test_feedback_serde_names() {
        assert_eq!(serde_json::to_string(&Feedback::Unset).unwrap(), "\"none\"");
        assert_eq!(
            serde_json::from_str::<Feedback>("\"positive\"").unwrap(),
            Feedback::Positive
        );
    }

    #[test]
    fn test_record_type_field_name() {
        let json = r#"{
            "id": "r1",
            "schema": "Genel",
            "question": "q",
            "conversation": [{"role": "user", "message": "hi"}],
            "feedback": "none",
            "hidden": false,
            "user": "ayse",
            "timestamp": "2024-01-02T03:04:05Z",
            "type": "sql"
        }"#;
        let record: ConversationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.kind.as_deref(), Some("sql"));
        assert_eq!(record.conversation[0].role, "user");
    }

    #[test]
    fn test_field_classification() {
        assert!(RecordField::Conversation.affects_embedding());
        assert!(RecordField::Question.affects_embedding());
        assert!(!RecordField::Schema.affects_embedding());
        assert!(!RecordField::Hidden.affects_embedding());
    }

    #[test]
    fn test_page_of_tokens() {
        let records = (0..5)
            .map(|i| ConversationRecord {
                id: RecordId::from(i.to_string()),
                schema: String::new(),
                question: String::new(),
                conversation: vec![],
                feedback: Feedback::Unset,
                hidden: false,
                user: String::new(),
                timestamp: Utc::now(),
                kind: None,
            })
            .collect::<Vec<_>>();

        let first = page_of(records.clone(), 0, 2);
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("2"));

        let last = page_of(records, 4, 2);
        assert_eq!(last.records.len(), 1);
        assert!(last.next_token.is_none());
    }

    #[test]
    fn test_invalid_page_token() {
        assert!(matches!(
            parse_offset(Some("abc")),
            Err(StoreError::InvalidPageToken(_))
        ));
        assert_eq!(parse_offset(None).unwrap(), 0);
    }
}
