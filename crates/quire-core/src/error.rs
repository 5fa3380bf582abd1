//! Error types for store operations
//!
//! [`StoreError`] is returned by `Store::apply` and the lifecycle/session
//! APIs. It is `Clone` so an attachment failure can be kept as lifecycle state
//! and carried inside an `AppliedChange` at the same time.

use std::sync::Arc;
use thiserror::Error;

use crate::storage::StorageError;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the entity store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The schema provider doesn't know the item type
    #[error("item type '{0}' is not supported")]
    TypeNotSupported(String),

    /// The mutation can't produce a valid object
    #[error("can't create data: {0}")]
    CantCreateData(Arc<str>),

    /// Persisting the change failed; nothing was applied
    #[error("can't store changes: {0}")]
    CantStoreChanges(Arc<str>),

    /// Snapshot extraction or file move failed
    #[error("can't unzip or move attachment: {0}")]
    CantUnzipOrMoveAttachment(Arc<str>),

    /// The download subsystem reported an error
    #[error("download failed: {0}")]
    DownloadFailed(Arc<str>),

    /// Some files of a batch import could not be copied into storage
    #[error("{0} file(s) could not be copied")]
    FileNotCopied(usize),

    /// The attachment can't be removed right now
    #[error("can't trash attachment {0}")]
    CantTrashAttachment(String),

    /// Changing the type would discard populated fields
    #[error("changing type drops populated fields: {}", .0.join(", "))]
    DroppedFieldsOnTypeChange(Vec<String>),

    /// A substantive external change arrived during an edit session
    #[error("item changed externally while being edited")]
    ConflictDuringEdit,

    /// The edit session was already saved or cancelled
    #[error("edit session for {0} is not active")]
    SessionClosed(String),

    #[error("item {0} not found")]
    ItemNotFound(String),

    #[error("attachment {0} not found")]
    AttachmentNotFound(String),

    #[error("annotation {0} not found")]
    AnnotationNotFound(String),

    /// Field isn't part of the item type's schema
    #[error("field '{field}' is not valid for item type '{item_type}'")]
    UnknownField { field: String, item_type: String },

    /// Lifecycle event not allowed from the attachment's current state
    #[error("attachment {key}: can't {event} while {state}")]
    InvalidTransition {
        key: String,
        state: String,
        event: String,
    },

    /// The page-info provider has no data for the page
    #[error("page {page} of {document} is unavailable")]
    PageUnavailable { document: String, page: u32 },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(Arc<str>),

    /// The coordinator task is no longer running
    #[error("store coordinator has stopped")]
    CoordinatorStopped,
}

impl StoreError {
    #[inline]
    pub fn cant_create_data(msg: impl Into<String>) -> Self {
        Self::CantCreateData(Arc::from(msg.into()))
    }

    #[inline]
    pub fn cant_store_changes(msg: impl Into<String>) -> Self {
        Self::CantStoreChanges(Arc::from(msg.into()))
    }

    #[inline]
    pub fn cant_unzip_or_move(msg: impl Into<String>) -> Self {
        Self::CantUnzipOrMoveAttachment(Arc::from(msg.into()))
    }

    #[inline]
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(Arc::from(msg.into()))
    }

    #[inline]
    pub fn invalid_geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(Arc::from(msg.into()))
    }

    /// Whether the caller can retry or confirm instead of giving up
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StoreError::DroppedFieldsOnTypeChange(_)
                | StoreError::ConflictDuringEdit
                | StoreError::CantUnzipOrMoveAttachment(_)
                | StoreError::FileNotCopied(_)
        )
    }
}

impl From<StorageError> for StoreError {
    fn from(error: StorageError) -> Self {
        StoreError::cant_store_changes(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropped_fields_display_lists_names() {
        let err = StoreError::DroppedFieldsOnTypeChange(vec![
            "publisher".to_string(),
            "place".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "changing type drops populated fields: publisher, place"
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_storage_error_becomes_cant_store_changes() {
        let storage = StorageError::CorruptRecord {
            key: "ABCD2345".to_string(),
            details: "bad json".to_string(),
        };
        let err: StoreError = storage.into();

        assert!(matches!(err, StoreError::CantStoreChanges(_)));
        assert!(err.to_string().contains("ABCD2345"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_errors_compare_by_value() {
        assert_eq!(
            StoreError::cant_unzip_or_move("bad archive"),
            StoreError::cant_unzip_or_move("bad archive")
        );
        assert_ne!(StoreError::FileNotCopied(1), StoreError::FileNotCopied(2));
    }
}
