//! Domain types shared between the messaging services, backend client, and
//! API layer.
//!
//! Wire names match the hosted backend's JSON (camelCase). Fields the
//! backend may omit carry serde defaults so rows parse straight off the
//! change feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Durable entities ────────────────────────────────────────────────────────

/// A conversation between two users, optionally tied to a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub participants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,
    /// Derived locally from the message arena; not authoritative on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    /// Derived locally; messages addressed to the viewer and not yet read.
    #[serde(default)]
    pub unread_count: u32,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
    /// Injected by the platform rather than typed by a participant.
    #[serde(default)]
    pub is_system: bool,
    /// Ids of users who have read the message. Grows monotonically.
    #[serde(default)]
    pub read_by: Vec<String>,
}

/// Delivery state of an outgoing message, derived from its read set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryState {
    Delivered,
    Read,
}

impl Message {
    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.iter().any(|id| id == user_id)
    }

    /// `Read` once anyone besides the sender has read the message.
    pub fn delivery_state(&self) -> DeliveryState {
        if self.read_by.iter().any(|id| *id != self.sender_id) {
            DeliveryState::Read
        } else {
            DeliveryState::Delivered
        }
    }

    /// Edit and delete are limited to the sender; system messages are
    /// immutable for everyone.
    pub fn can_modify(&self, user_id: &str) -> bool {
        self.sender_id == user_id && !self.is_system
    }
}

/// Identity of a chat thread: the unordered participant pair plus the
/// listing it concerns. Duplicate chat rows sharing a key collapse to one
/// thread at read time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pair: (String, String),
    listing_id: Option<String>,
}

impl ThreadKey {
    pub fn new(a: &str, b: &str, listing_id: Option<&str>) -> Self {
        let pair = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        Self {
            pair,
            listing_id: listing_id.map(|id| id.to_string()),
        }
    }
}

impl Chat {
    pub fn involves(&self, user_id: &str) -> bool {
        self.participants.iter().any(|id| id == user_id)
    }

    /// The peer in a two-party chat.
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        self.participants
            .iter()
            .find(|id| *id != user_id)
            .map(|id| id.as_str())
    }

    pub fn thread_key(&self) -> ThreadKey {
        let a = self.participants.first().map(|s| s.as_str()).unwrap_or("");
        let b = self.participants.get(1).map(|s| s.as_str()).unwrap_or("");
        ThreadKey::new(a, b, self.listing_id.as_deref())
    }
}

/// An in-app notification delivered to one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    /// Chat, listing, or review the notification points at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    /// Dismissed from the notification panel without deleting the row.
    #[serde(default)]
    pub is_cleared: bool,
}

/// Notification categories recognised by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewMessage,
    ListingApproved,
    ListingRejected,
    NewReview,
}

/// A directed block: `blocker_id` no longer accepts messages from
/// `blocked_id`. The reverse direction is a separate edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockEdge {
    pub id: String,
    pub blocker_id: String,
    pub blocked_id: String,
}

// ── Session identity ────────────────────────────────────────────────────────

/// The authenticated user this client instance acts as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    /// Shown to peers, e.g. in new-message notification previews.
    pub display_name: String,
}

// ── Presence ────────────────────────────────────────────────────────────────

/// Ephemeral typing signal broadcast over the realtime channel. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPing {
    pub chat_id: String,
    pub user_id: String,
    /// Explicit stop, sent when the composer is cleared or the chat closed.
    #[serde(default)]
    pub stopped: bool,
}

// ── Change feed ─────────────────────────────────────────────────────────────

/// Mutation kind carried by a change feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// The row a change event concerns, tagged by table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "record", rename_all = "lowercase")]
pub enum ChangeRecord {
    Chat(Chat),
    Message(Message),
    Notification(Notification),
}

impl ChangeRecord {
    pub fn id(&self) -> &str {
        match self {
            ChangeRecord::Chat(chat) => &chat.id,
            ChangeRecord::Message(message) => &message.id,
            ChangeRecord::Notification(notification) => &notification.id,
        }
    }
}

/// One mutation observed on the backend, delivered over the subscription
/// stream and also synthesised locally for confirmed writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    #[serde(flatten)]
    pub record: ChangeRecord,
}

impl ChangeEvent {
    pub fn insert(record: ChangeRecord) -> Self {
        Self {
            kind: ChangeKind::Insert,
            record,
        }
    }

    pub fn update(record: ChangeRecord) -> Self {
        Self {
            kind: ChangeKind::Update,
            record,
        }
    }

    pub fn delete(record: ChangeRecord) -> Self {
        Self {
            kind: ChangeKind::Delete,
            record,
        }
    }
}
