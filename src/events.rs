//! Broadcast bus carrying store and presence updates to the UI shell.
//!
//! The shell subscribes once at startup and forwards each event over its
//! bridge; services publish after every durable mutation or presence change.
//! Publishing with no subscribers is a no-op.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::services::types::{Chat, Message, Notification};

const EVENT_CAPACITY: usize = 256;

/// Events emitted to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum UiEvent {
    /// A message newly visible in a chat, local or remote.
    #[serde(rename_all = "camelCase")]
    MessageReceived { chat_id: String, message: Message },
    /// An existing message changed (edit, tombstone, read receipt).
    #[serde(rename_all = "camelCase")]
    MessageUpdated { chat_id: String, message: Message },
    /// A chat appeared or its derived fields moved.
    ChatUpdated { chat: Chat },
    #[serde(rename_all = "camelCase")]
    ChatDeleted { chat_id: String },
    /// Unread totals after any change that can move them.
    #[serde(rename_all = "camelCase")]
    UnreadCount {
        total: u32,
        by_chat: HashMap<String, u32>,
    },
    NotificationReceived { notification: Notification },
    /// Bulk notification change (mark-all-read, clear-all); the UI re-reads.
    NotificationsUpdated,
    /// The set of users currently typing in a chat.
    #[serde(rename_all = "camelCase")]
    TypingChanged { chat_id: String, users: Vec<String> },
    BlocklistChanged,
}

/// Fan-out bus built on a tokio broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UiEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    /// Send an event to all subscribers. A send error only means nobody is
    /// listening yet, so it is ignored.
    pub fn publish(&self, event: UiEvent) {
        let _ = self.tx.send(event);
    }

    pub fn publish_all<I>(&self, events: I)
    where
        I: IntoIterator<Item = UiEvent>,
    {
        for event in events {
            self.publish(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
