use crate::eid::RecordId;
use crate::records::StoreError;
use crate::semantic::queue::QueueError;
use crate::semantic::{IndexError, SearchError, SyncError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("record {0} not found")]
    NotFound(RecordId),

    #[error("record store error: {0}")]
    Store(StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Queue(QueueError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => AppError::NotFound(id),
            e => AppError::Store(e),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Sync(e) => AppError::Sync(e),
            e => AppError::Queue(e),
        }
    }
}
