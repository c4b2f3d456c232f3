//! Error types for the Baraholka client core.

use serde::{Serialize, Serializer};
use thiserror::Error;

/// All errors surfaced by the client core.
#[derive(Debug, Error)]
pub enum BaraholkaError {
    /// Messaging pipeline failure (validation, unknown chat, store state).
    #[error("Chat error: {0}")]
    ChatError(String),

    /// The hosted backend rejected a request or could not be reached.
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Local filesystem access failed (attachments, config directory).
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Configuration could not be loaded or persisted.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Attachment could not be uploaded to blob storage.
    #[error("Attachment upload failed: {0}")]
    AttachmentUploadError(String),

    /// The recipient has blocked the sender.
    #[error("Recipient has blocked you")]
    RecipientBlocked,

    /// A message with no text and no attachment.
    #[error("Message is empty")]
    EmptyMessage,

    /// Message content over the configured size limit.
    #[error("Message too long: {0} bytes (limit {1})")]
    MessageTooLong(usize, usize),

    /// The caller may not modify this record.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The requested record does not exist locally.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BaraholkaError>;

// Errors cross the UI bridge as their display strings.
impl Serialize for BaraholkaError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
