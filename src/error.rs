use thiserror::Error;

use crate::document::DocumentPath;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("Document already exists: {0}")]
    AlreadyExists(DocumentPath),

    #[error("Batch has {ops} operations (max {max})")]
    BatchTooLarge { ops: usize, max: usize },

    #[error("Failed to encode document data: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode document {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Document not found: {0}")]
    MissingDocument(DocumentPath),

    #[error("Document {path} has no `{field}` field")]
    MissingField {
        path: DocumentPath,
        field: &'static str,
    },

    #[error("Document {path} is malformed: {reason}")]
    InvalidDocument { path: DocumentPath, reason: String },

    #[error("Document {path} names recipient {recipient:?}: {reason}")]
    InvalidRecipient {
        path: DocumentPath,
        recipient: String,
        reason: String,
    },

    #[error("Chat {chat} has no participant other than the sender")]
    NoRecipient { chat: DocumentPath },

    #[error(transparent)]
    Store(#[from] StoreError),
}
