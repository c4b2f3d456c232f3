//! Id-keyed entity arenas behind a single merge reducer.
//!
//! Every durable mutation reaches the store the same way: as a
//! [`ChangeEvent`] passed to [`EntityStore::apply`], whether it came off the
//! realtime feed or was synthesised locally from a confirmed write. Merges
//! are keyed by id and idempotent, so duplicate echoes and reordered events
//! cannot fork the local view. Derived chat fields (last message, unread
//! count) are recomputed from the message arena after each merge.

use std::collections::HashMap;

use crate::events::UiEvent;
use crate::services::types::{
    ChangeEvent, ChangeKind, ChangeRecord, Chat, Message, Notification, ThreadKey,
};

pub struct EntityStore {
    viewer_id: String,
    chats: HashMap<String, Chat>,
    messages: HashMap<String, Message>,
    notifications: HashMap<String, Notification>,
}

impl EntityStore {
    pub fn new(viewer_id: &str) -> Self {
        Self {
            viewer_id: viewer_id.to_string(),
            chats: HashMap::new(),
            messages: HashMap::new(),
            notifications: HashMap::new(),
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    // ── Reducer ─────────────────────────────────────────────────────────────

    /// Merge one change into the store and return the UI events it caused.
    /// Applying the same event twice returns no events the second time.
    pub fn apply(&mut self, event: ChangeEvent) -> Vec<UiEvent> {
        match (event.kind, event.record) {
            (ChangeKind::Insert, ChangeRecord::Chat(chat)) => self.insert_chat(chat),
            (ChangeKind::Update, ChangeRecord::Chat(chat)) => self.update_chat(chat),
            (ChangeKind::Delete, ChangeRecord::Chat(chat)) => self.delete_chat(&chat.id),
            (ChangeKind::Insert, ChangeRecord::Message(message)) => self.insert_message(message),
            (ChangeKind::Update, ChangeRecord::Message(message)) => self.update_message(message),
            (ChangeKind::Delete, ChangeRecord::Message(message)) => self.delete_message(message),
            (ChangeKind::Insert, ChangeRecord::Notification(notification)) => {
                self.insert_notification(notification)
            }
            (ChangeKind::Update, ChangeRecord::Notification(notification)) => {
                self.update_notification(notification)
            }
            (ChangeKind::Delete, ChangeRecord::Notification(notification)) => {
                self.delete_notification(&notification.id)
            }
        }
    }

    fn insert_chat(&mut self, chat: Chat) -> Vec<UiEvent> {
        if self.chats.contains_key(&chat.id) {
            return Vec::new();
        }
        let mut chat = chat;
        // Derived fields are owned locally; ignore whatever the row carried.
        chat.last_message = None;
        chat.unread_count = 0;
        let id = chat.id.clone();
        self.chats.insert(id.clone(), chat.clone());
        self.refresh_chat_derived(&id);
        let refreshed = self.chats.get(&id).cloned().unwrap_or(chat);
        vec![UiEvent::ChatUpdated { chat: refreshed }]
    }

    fn update_chat(&mut self, incoming: Chat) -> Vec<UiEvent> {
        let current = match self.chats.get(&incoming.id) {
            Some(current) => current.clone(),
            None => return self.insert_chat(incoming),
        };
        let merged = merge_chat(&current, incoming);
        if merged == current {
            return Vec::new();
        }
        let id = merged.id.clone();
        self.chats.insert(id.clone(), merged.clone());
        self.refresh_chat_derived(&id);
        let refreshed = self.chats.get(&id).cloned().unwrap_or(merged);
        vec![UiEvent::ChatUpdated { chat: refreshed }]
    }

    fn delete_chat(&mut self, chat_id: &str) -> Vec<UiEvent> {
        if !self.chats.contains_key(chat_id) {
            return Vec::new();
        }
        let total_before = self.total_unread();
        self.chats.remove(chat_id);
        self.messages.retain(|_, message| message.chat_id != chat_id);
        let mut events = vec![UiEvent::ChatDeleted {
            chat_id: chat_id.to_string(),
        }];
        if self.total_unread() != total_before {
            events.push(self.unread_event());
        }
        events
    }

    fn insert_message(&mut self, message: Message) -> Vec<UiEvent> {
        if self.messages.contains_key(&message.id) {
            return Vec::new();
        }
        let mut message = message;
        normalize_tombstone(&mut message);
        let total_before = self.total_unread();
        let chat_id = message.chat_id.clone();
        self.messages.insert(message.id.clone(), message.clone());
        let mut events = vec![UiEvent::MessageReceived {
            chat_id: chat_id.clone(),
            message,
        }];
        if self.refresh_chat_derived(&chat_id) {
            if let Some(chat) = self.chats.get(&chat_id) {
                events.push(UiEvent::ChatUpdated { chat: chat.clone() });
            }
        }
        if self.total_unread() != total_before {
            events.push(self.unread_event());
        }
        events
    }

    fn update_message(&mut self, incoming: Message) -> Vec<UiEvent> {
        let current = match self.messages.get(&incoming.id) {
            Some(current) => current.clone(),
            None => return self.insert_message(incoming),
        };
        let merged = merge_message(&current, incoming);
        if merged == current {
            return Vec::new();
        }
        let total_before = self.total_unread();
        let chat_id = merged.chat_id.clone();
        self.messages.insert(merged.id.clone(), merged.clone());
        let mut events = vec![UiEvent::MessageUpdated {
            chat_id: chat_id.clone(),
            message: merged,
        }];
        if self.refresh_chat_derived(&chat_id) {
            if let Some(chat) = self.chats.get(&chat_id) {
                events.push(UiEvent::ChatUpdated { chat: chat.clone() });
            }
        }
        if self.total_unread() != total_before {
            events.push(self.unread_event());
        }
        events
    }

    /// Deletion tombstones the row instead of removing it, so the thread
    /// keeps its place in history.
    fn delete_message(&mut self, record: Message) -> Vec<UiEvent> {
        let mut tombstone = record;
        tombstone.is_deleted = true;
        self.update_message(tombstone)
    }

    fn insert_notification(&mut self, notification: Notification) -> Vec<UiEvent> {
        if self.notifications.contains_key(&notification.id) {
            return Vec::new();
        }
        self.notifications
            .insert(notification.id.clone(), notification.clone());
        if notification.user_id != self.viewer_id || notification.is_cleared {
            return Vec::new();
        }
        vec![UiEvent::NotificationReceived { notification }]
    }

    fn update_notification(&mut self, incoming: Notification) -> Vec<UiEvent> {
        let current = match self.notifications.get(&incoming.id) {
            Some(current) => current.clone(),
            None => return self.insert_notification(incoming),
        };
        let merged = merge_notification(&current, incoming);
        if merged == current {
            return Vec::new();
        }
        self.notifications.insert(merged.id.clone(), merged);
        vec![UiEvent::NotificationsUpdated]
    }

    fn delete_notification(&mut self, id: &str) -> Vec<UiEvent> {
        if self.notifications.remove(id).is_none() {
            return Vec::new();
        }
        vec![UiEvent::NotificationsUpdated]
    }

    // ── Derived fields ──────────────────────────────────────────────────────

    fn refresh_chat_derived(&mut self, chat_id: &str) -> bool {
        let (current_last, current_unread) = match self.chats.get(chat_id) {
            Some(chat) => (chat.last_message.clone(), chat.unread_count),
            None => return false,
        };
        let mut last: Option<&Message> = None;
        let mut unread = 0u32;
        for message in self.messages.values().filter(|m| m.chat_id == chat_id) {
            let newer = match last {
                Some(current) => {
                    (message.timestamp, &message.id) > (current.timestamp, &current.id)
                }
                None => true,
            };
            if newer {
                last = Some(message);
            }
            if !message.is_deleted
                && message.sender_id != self.viewer_id
                && !message.is_read_by(&self.viewer_id)
            {
                unread += 1;
            }
        }
        let last = last.cloned();
        if current_last == last && current_unread == unread {
            return false;
        }
        if let Some(chat) = self.chats.get_mut(chat_id) {
            chat.last_message = last;
            chat.unread_count = unread;
        }
        true
    }

    fn unread_event(&self) -> UiEvent {
        UiEvent::UnreadCount {
            total: self.total_unread(),
            by_chat: self.unread_by_chat(),
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    pub fn chat(&self, id: &str) -> Option<&Chat> {
        self.chats.get(id)
    }

    pub fn contains_chat(&self, id: &str) -> bool {
        self.chats.contains_key(id)
    }

    /// The chat row for a thread key. When duplicate rows exist, the one
    /// with the lowest id wins so every client picks the same row.
    pub fn find_chat(&self, key: &ThreadKey) -> Option<&Chat> {
        self.chats
            .values()
            .filter(|chat| chat.thread_key() == *key)
            .min_by(|a, b| a.id.cmp(&b.id))
    }

    /// The viewer's chat list, one row per thread, most recent activity
    /// first.
    pub fn chats(&self) -> Vec<Chat> {
        let mut winners: HashMap<ThreadKey, &Chat> = HashMap::new();
        for chat in self.chats.values().filter(|c| c.involves(&self.viewer_id)) {
            let key = chat.thread_key();
            match winners.get(&key) {
                Some(existing) if existing.id <= chat.id => {}
                _ => {
                    winners.insert(key, chat);
                }
            }
        }
        let mut list: Vec<Chat> = winners.into_values().cloned().collect();
        list.sort_by(|a, b| {
            let a_ts = a.last_message.as_ref().map(|m| m.timestamp);
            let b_ts = b.last_message.as_ref().map(|m| m.timestamp);
            b_ts.cmp(&a_ts).then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.get(id)
    }

    /// Messages of one chat in chronological order. Tombstones are included
    /// so threads keep their shape.
    pub fn messages(&self, chat_id: &str) -> Vec<Message> {
        let mut list: Vec<Message> = self
            .messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));
        list
    }

    pub fn notification(&self, id: &str) -> Option<&Notification> {
        self.notifications.get(id)
    }

    /// The viewer's visible notifications, newest first. Cleared rows are
    /// filtered out.
    pub fn notifications(&self) -> Vec<Notification> {
        let mut list: Vec<Notification> = self
            .notifications
            .values()
            .filter(|n| n.user_id == self.viewer_id && !n.is_cleared)
            .cloned()
            .collect();
        list.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
        list
    }

    pub fn total_unread(&self) -> u32 {
        self.chats().iter().map(|chat| chat.unread_count).sum()
    }

    pub fn unread_by_chat(&self) -> HashMap<String, u32> {
        self.chats()
            .into_iter()
            .filter(|chat| chat.unread_count > 0)
            .map(|chat| (chat.id, chat.unread_count))
            .collect()
    }
}

fn merge_chat(current: &Chat, incoming: Chat) -> Chat {
    let mut merged = incoming;
    merged.id = current.id.clone();
    // Derived fields are recomputed after the merge, not taken off the wire.
    merged.last_message = current.last_message.clone();
    merged.unread_count = current.unread_count;
    merged
}

fn merge_message(current: &Message, incoming: Message) -> Message {
    let mut merged = incoming;
    // Server-assigned fields never move.
    merged.id = current.id.clone();
    merged.chat_id = current.chat_id.clone();
    merged.sender_id = current.sender_id.clone();
    merged.timestamp = current.timestamp;
    // Flags only ever advance, and read receipts only grow; a stale or
    // reordered row cannot roll them back.
    merged.is_edited = merged.is_edited || current.is_edited;
    merged.is_deleted = merged.is_deleted || current.is_deleted;
    let mut read_by = current.read_by.clone();
    for reader in merged.read_by {
        if !read_by.contains(&reader) {
            read_by.push(reader);
        }
    }
    merged.read_by = read_by;
    normalize_tombstone(&mut merged);
    merged
}

fn merge_notification(current: &Notification, incoming: Notification) -> Notification {
    let mut merged = incoming;
    merged.id = current.id.clone();
    merged.is_read = merged.is_read || current.is_read;
    merged.is_cleared = merged.is_cleared || current.is_cleared;
    merged
}

/// A deleted message keeps its row but loses its payload.
fn normalize_tombstone(message: &mut Message) {
    if message.is_deleted {
        message.content.clear();
        message.attachment_url = None;
    }
}
