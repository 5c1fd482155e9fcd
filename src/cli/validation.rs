use crate::cli::errors::{CliError, CliResult};
use crate::records::{Feedback, Message, RecordUpdate};

/// Largest accepted result limit
const MAX_LIMIT: usize = 1000;

pub fn validate_id(id: &str) -> CliResult<()> {
    if id.trim().is_empty() {
        return Err(CliError::validation("id", "Record id cannot be empty"));
    }
    Ok(())
}

pub fn parse_feedback(value: &str) -> CliResult<Feedback> {
    value
        .parse::<Feedback>()
        .map_err(|message| CliError::validation("feedback", message))
}

pub fn validate_limit(limit: Option<usize>) -> CliResult<()> {
    match limit {
        Some(0) => Err(CliError::validation("limit", "Limit must be greater than 0")),
        Some(n) if n > MAX_LIMIT => Err(CliError::validation(
            "limit",
            format!("Limit cannot exceed {MAX_LIMIT}"),
        )),
        _ => Ok(()),
    }
}

pub fn validate_min_score(min_score: Option<f32>) -> CliResult<()> {
    match min_score {
        Some(score) if !(-1.0..=1.0).contains(&score) => Err(CliError::validation(
            "min-score",
            "Score must be between -1.0 and 1.0",
        )),
        _ => Ok(()),
    }
}

pub fn validate_batch_size(batch_size: Option<usize>) -> CliResult<()> {
    if batch_size == Some(0) {
        return Err(CliError::validation("batch-size", "Batch size must be greater than 0"));
    }
    Ok(())
}

/// Parse a messages file body.
pub fn parse_messages(data: &str) -> CliResult<Vec<Message>> {
    let messages: Vec<Message> = serde_json::from_str(data)?;

    if messages.iter().any(|m| m.role.trim().is_empty()) {
        return Err(CliError::validation("messages", "Every message needs a role"));
    }

    Ok(messages)
}

pub fn validate_update(update: &RecordUpdate) -> CliResult<()> {
    if update.is_empty() {
        return Err(CliError::validation("edit", "This update request does nothing"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feedback() {
        assert_eq!(parse_feedback("positive").unwrap(), Feedback::Positive);
        assert!(matches!(
            parse_feedback("great"),
            Err(CliError::Validation { .. })
        ));
    }

    #[test]
    fn test_limits() {
        assert!(validate_limit(None).is_ok());
        assert!(validate_limit(Some(5)).is_ok());
        assert!(validate_limit(Some(0)).is_err());
        assert!(validate_limit(Some(MAX_LIMIT + 1)).is_err());
        assert!(validate_min_score(Some(0.3)).is_ok());
        assert!(validate_min_score(Some(1.5)).is_err());
        assert!(validate_batch_size(Some(0)).is_err());
    }

    #[test]
    fn test_parse_messages() {
        let messages =
            parse_messages(r#"[{"role": "user", "message": "hi"}, {"role": "assistant", "message": "hello"}]"#)
                .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], Message::new("assistant", "hello"));

        assert!(parse_messages(r#"[{"role": " ", "message": "hi"}]"#).is_err());
        assert!(parse_messages("not json").is_err());
    }

    #[test]
    fn test_empty_update_rejected() {
        assert!(validate_update(&RecordUpdate::default()).is_err());
        assert!(validate_update(&RecordUpdate {
            hidden: Some(true),
            ..Default::default()
        })
        .is_ok());
    }
}
