//! Content preprocessing for embedding generation.
//!
//! Prepares a conversation for embedding:
//! 1. Trim the question and every message
//! 2. Drop empty messages
//! 3. Join as `question` followed by `role: message` lines
//! 4. Truncate to max length with ellipsis

use crate::records::ConversationRecord;
use sha2::{Digest, Sha256};

/// Maximum content length for embedding input (characters, not tokens)
const MAX_CONTENT_LENGTH: usize = 2048;

/// Ellipsis suffix when content is truncated
const TRUNCATION_SUFFIX: &str = "...";

/// Build the embedding input for a record.
///
/// Returns an empty string when the record has no text at all; embedders
/// map that to their canonical vector.
pub fn embedding_input(record: &ConversationRecord) -> String {
    let mut lines = Vec::with_capacity(record.conversation.len() + 1);

    let question = record.question.trim();
    if !question.is_empty() {
        lines.push(question.to_string());
    }

    for msg in &record.conversation {
        let text = msg.message.trim();
        if text.is_empty() {
            continue;
        }
        let role = msg.role.trim();
        if role.is_empty() {
            lines.push(text.to_string());
        } else {
            lines.push(format!("{}: {}", role, text));
        }
    }

    truncate_content(&lines.join("\n"))
}

/// Truncate content to MAX_CONTENT_LENGTH characters, adding ellipsis if
/// truncated.
fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_LENGTH {
        return content.to_string();
    }

    let max_chars = MAX_CONTENT_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = content.chars().take(max_chars).collect();

    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}

/// Hash of the embedding input, stored in the payload to detect edits
/// that do not change what gets embedded.
pub fn content_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Feedback, Message};
    use chrono::Utc;

    fn record(question: &str, messages: &[(&str, &str)]) -> ConversationRecord {
        ConversationRecord {
            id: "r1".into(),
            schema: "Genel".to_string(),
            question: question.to_string(),
            conversation: messages.iter().map(|(r, m)| Message::new(r, m)).collect(),
            feedback: Feedback::Unset,
            hidden: false,
            user: "u".to_string(),
            timestamp: Utc::now(),
            kind: None,
        }
    }

    #[test]
    fn test_question_and_messages() {
        let r = record("  How many vacation days?  ", &[("user", " hi "), ("assistant", "20")]);
        assert_eq!(
            embedding_input(&r),
            "How many vacation days?\nuser: hi\nassistant: 20"
        );
    }

    #[test]
    fn test_empty_messages_skipped() {
        let r = record("", &[("user", "   "), ("", "plain")]);
        assert_eq!(embedding_input(&r), "plain");
    }

    #[test]
    fn test_empty_record() {
        assert_eq!(embedding_input(&record("", &[])), "");
    }

    #[test]
    fn test_truncation_is_char_safe() {
        let long = "ş".repeat(MAX_CONTENT_LENGTH + 10);
        let content = embedding_input(&record(&long, &[]));

        assert_eq!(content.chars().count(), MAX_CONTENT_LENGTH);
        assert!(content.ends_with(TRUNCATION_SUFFIX));
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(content_hash("a"), content_hash("a"));
        assert_ne!(content_hash("a"), content_hash("b"));
        assert_eq!(content_hash("a").len(), 16);
    }
}
