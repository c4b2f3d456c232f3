//! Contracts for the hosted backend.
//!
//! All durable data lives behind [`DataBackend`] and attachment bytes behind
//! [`BlobStore`]; the services never talk HTTP directly. [`http`] provides
//! the production implementations, tests substitute mocks.

pub mod http;

pub use http::{HttpBackend, HttpBlobStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::services::types::{
    BlockEdge, ChangeEvent, Chat, Message, Notification, NotificationKind, TypingPing,
};

// ── Query model ─────────────────────────────────────────────────────────────

/// A column filter applied to a backend query. Column names use the wire
/// spelling (camelCase).
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Column equals the value.
    Eq(&'static str, String),
    /// Column is one of the values.
    In(&'static str, Vec<String>),
    /// Array column contains every listed value.
    Contains(&'static str, Vec<String>),
}

// ── Write payloads ──────────────────────────────────────────────────────────

/// Row to insert into the chats table. The backend assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChat {
    pub participants: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,
}

/// Row to insert into the messages table. The backend assigns id and
/// timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    /// Starts as `[sender_id]`; the sender has trivially read their own
    /// message.
    #[serde(default)]
    pub read_by: Vec<String>,
}

/// Partial message update; absent fields stay untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_edited: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_by: Option<Vec<String>>,
}

/// Row to insert into the notifications table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
}

/// Partial notification update; absent fields stay untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_cleared: Option<bool>,
}

/// Row to insert into the blocks table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBlock {
    pub blocker_id: String,
    pub blocked_id: String,
}

// ── Provider traits ─────────────────────────────────────────────────────────

/// Gateway to the hosted data and realtime backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataBackend: Send + Sync {
    // Chats
    async fn insert_chat(&self, new: NewChat) -> Result<Chat>;
    async fn query_chats(&self, filters: &[Filter]) -> Result<Vec<Chat>>;
    /// Returns the number of rows removed.
    async fn delete_chat(&self, id: &str) -> Result<u64>;

    // Messages
    /// Fails with `RecipientBlocked` when backend policy refuses the write.
    async fn insert_message(&self, new: NewMessage) -> Result<Message>;
    async fn query_messages(&self, filters: &[Filter]) -> Result<Vec<Message>>;
    async fn update_message(&self, id: &str, update: MessageUpdate) -> Result<Message>;

    // Notifications
    async fn insert_notification(&self, new: NewNotification) -> Result<Notification>;
    async fn query_notifications(&self, filters: &[Filter]) -> Result<Vec<Notification>>;
    /// Returns the updated rows.
    async fn update_notifications(
        &self,
        filters: &[Filter],
        update: NotificationUpdate,
    ) -> Result<Vec<Notification>>;
    /// Returns the number of rows removed. Zero is not an error; backend
    /// policy may silently refuse deletes.
    async fn delete_notifications(&self, filters: &[Filter]) -> Result<u64>;

    // Blocks
    async fn insert_block(&self, new: NewBlock) -> Result<BlockEdge>;
    async fn query_blocks(&self, filters: &[Filter]) -> Result<Vec<BlockEdge>>;
    async fn delete_blocks(&self, filters: &[Filter]) -> Result<u64>;

    // Realtime
    /// Change events for every table the user can see. The stream reconnects
    /// internally; the receiver only closes when dropped.
    async fn subscribe_changes(&self, user_id: &str) -> Result<mpsc::Receiver<ChangeEvent>>;
    /// Fire-and-forget typing signal.
    async fn broadcast_typing(&self, ping: TypingPing) -> Result<()>;
    async fn subscribe_typing(&self) -> Result<mpsc::Receiver<TypingPing>>;
}

/// Attachment blob storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload a local file and return its public URL.
    async fn upload(&self, path: &Path) -> Result<String>;
}
