use thiserror::Error;

use crate::app::errors::AppError;
use crate::semantic::SearchError;

/// Domain-specific errors for CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Record not found: {id}")]
    NotFound { id: String },

    #[error("Search unavailable: {message}")]
    SearchUnavailable { message: String },

    #[error("Index schema mismatch, rebuild the collection: {message}")]
    SchemaMismatch { message: String },

    #[error("Storage operation failed: {message}")]
    Storage { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CliError {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

impl From<AppError> for CliError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(id) => Self::NotFound { id: id.to_string() },
            AppError::Search(SearchError::SearchUnavailable(message)) => {
                Self::SearchUnavailable { message }
            }
            AppError::Search(SearchError::SchemaMismatch(message)) => {
                Self::SchemaMismatch { message }
            }
            AppError::Sync(e) if e.is_fatal() => Self::SchemaMismatch {
                message: e.to_string(),
            },
            AppError::Store(e) => Self::Storage {
                message: e.to_string(),
            },
            e => Self::Internal {
                message: e.to_string(),
            },
        }
    }
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            message: format!("{err:#}"),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::Storage {
                message: "File not found".to_string(),
            },
            std::io::ErrorKind::PermissionDenied => Self::Storage {
                message: "Permission denied".to_string(),
            },
            _ => Self::Storage {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation("json", err.to_string())
    }
}
