//! Shared test backend: an in-memory stand-in for the hosted service.
//!
//! Tables live behind a mutex; every confirmed write is echoed to every
//! change-feed subscriber, including the writer's own, the way the real
//! backend replays a client's writes back at it. The block policy of the
//! production service is enforced here too, so stale-blocklist sends fail
//! the same way they would in the field.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use baraholka_client::backend::{
    BlobStore, DataBackend, Filter, MessageUpdate, NewBlock, NewChat, NewMessage, NewNotification,
    NotificationUpdate,
};
use baraholka_client::services::types::{
    BlockEdge, ChangeEvent, ChangeRecord, Chat, Message, Notification, TypingPing,
};
use baraholka_client::{BaraholkaError, Result};

const FEED_BUFFER: usize = 64;

#[derive(Default)]
struct Tables {
    chats: Vec<Chat>,
    messages: Vec<Message>,
    notifications: Vec<Notification>,
    blocks: Vec<BlockEdge>,
}

#[derive(Default)]
pub struct InMemoryBackend {
    tables: Mutex<Tables>,
    next_id: AtomicU64,
    change_feeds: Mutex<Vec<mpsc::Sender<ChangeEvent>>>,
    typing_feeds: Mutex<Vec<mpsc::Sender<TypingPing>>>,
    /// Counts every insert_message call, accepted or refused.
    message_insert_attempts: AtomicU64,
    /// Simulates a backend whose access policy silently refuses
    /// notification deletes.
    refuse_notification_deletes: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing_notification_deletes(self) -> Self {
        self.refuse_notification_deletes.store(true, Ordering::SeqCst);
        self
    }

    pub fn message_insert_attempts(&self) -> u64 {
        self.message_insert_attempts.load(Ordering::SeqCst)
    }

    fn assign_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{:04}", prefix, n)
    }

    async fn emit(&self, event: ChangeEvent) {
        let senders: Vec<mpsc::Sender<ChangeEvent>> = {
            let feeds = self.change_feeds.lock().unwrap();
            feeds.clone()
        };
        for tx in senders {
            let _ = tx.send(event.clone()).await;
        }
    }

    /// Whether any other participant of the chat has blocked the sender.
    fn sender_is_blocked(&self, new: &NewMessage) -> bool {
        let tables = self.tables.lock().unwrap();
        let chat = match tables.chats.iter().find(|c| c.id == new.chat_id) {
            Some(chat) => chat,
            None => return false,
        };
        chat.participants.iter().any(|participant| {
            *participant != new.sender_id
                && tables.blocks.iter().any(|edge| {
                    edge.blocker_id == *participant && edge.blocked_id == new.sender_id
                })
        })
    }
}

fn chat_matches(chat: &Chat, filter: &Filter) -> bool {
    match filter {
        Filter::Eq("id", value) => chat.id == *value,
        Filter::In("id", values) => values.contains(&chat.id),
        Filter::Contains("participants", values) => {
            values.iter().all(|v| chat.participants.contains(v))
        }
        _ => false,
    }
}

fn message_matches(message: &Message, filter: &Filter) -> bool {
    match filter {
        Filter::Eq("id", value) => message.id == *value,
        Filter::Eq("chatId", value) => message.chat_id == *value,
        Filter::In("chatId", values) => values.contains(&message.chat_id),
        _ => false,
    }
}

fn notification_matches(notification: &Notification, filter: &Filter) -> bool {
    match filter {
        Filter::Eq("id", value) => notification.id == *value,
        Filter::Eq("userId", value) => notification.user_id == *value,
        Filter::Eq("isRead", value) => notification.is_read.to_string() == *value,
        _ => false,
    }
}

fn block_matches(edge: &BlockEdge, filter: &Filter) -> bool {
    match filter {
        Filter::Eq("blockerId", value) => edge.blocker_id == *value,
        Filter::Eq("blockedId", value) => edge.blocked_id == *value,
        _ => false,
    }
}

#[async_trait]
impl DataBackend for InMemoryBackend {
    async fn insert_chat(&self, new: NewChat) -> Result<Chat> {
        let chat = Chat {
            id: self.assign_id("chat"),
            participants: new.participants,
            listing_id: new.listing_id,
            last_message: None,
            unread_count: 0,
        };
        {
            let mut tables = self.tables.lock().unwrap();
            tables.chats.push(chat.clone());
        }
        self.emit(ChangeEvent::insert(ChangeRecord::Chat(chat.clone())))
            .await;
        Ok(chat)
    }

    async fn query_chats(&self, filters: &[Filter]) -> Result<Vec<Chat>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .chats
            .iter()
            .filter(|chat| filters.iter().all(|f| chat_matches(chat, f)))
            .cloned()
            .collect())
    }

    async fn delete_chat(&self, id: &str) -> Result<u64> {
        let removed = {
            let mut tables = self.tables.lock().unwrap();
            let before = tables.chats.len();
            let removed_chat = tables.chats.iter().find(|c| c.id == id).cloned();
            tables.chats.retain(|c| c.id != id);
            tables.messages.retain(|m| m.chat_id != id);
            removed_chat.filter(|_| tables.chats.len() < before)
        };
        match removed {
            Some(chat) => {
                self.emit(ChangeEvent::delete(ChangeRecord::Chat(chat))).await;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        self.message_insert_attempts.fetch_add(1, Ordering::SeqCst);
        if self.sender_is_blocked(&new) {
            return Err(BaraholkaError::RecipientBlocked);
        }
        let message = Message {
            id: self.assign_id("msg"),
            chat_id: new.chat_id,
            sender_id: new.sender_id,
            content: new.content,
            timestamp: Utc::now(),
            attachment_url: new.attachment_url,
            is_edited: false,
            is_deleted: false,
            is_system: new.is_system,
            read_by: new.read_by,
        };
        {
            let mut tables = self.tables.lock().unwrap();
            tables.messages.push(message.clone());
        }
        self.emit(ChangeEvent::insert(ChangeRecord::Message(message.clone())))
            .await;
        Ok(message)
    }

    async fn query_messages(&self, filters: &[Filter]) -> Result<Vec<Message>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .messages
            .iter()
            .filter(|message| filters.iter().all(|f| message_matches(message, f)))
            .cloned()
            .collect())
    }

    async fn update_message(&self, id: &str, update: MessageUpdate) -> Result<Message> {
        let updated = {
            let mut tables = self.tables.lock().unwrap();
            let row = tables
                .messages
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or_else(|| BaraholkaError::NotFound(format!("message {}", id)))?;
            if let Some(content) = update.content {
                row.content = content;
            }
            if let Some(is_edited) = update.is_edited {
                row.is_edited = is_edited;
            }
            if let Some(is_deleted) = update.is_deleted {
                row.is_deleted = is_deleted;
            }
            if let Some(read_by) = update.read_by {
                row.read_by = read_by;
            }
            row.clone()
        };
        self.emit(ChangeEvent::update(ChangeRecord::Message(updated.clone())))
            .await;
        Ok(updated)
    }

    async fn insert_notification(&self, new: NewNotification) -> Result<Notification> {
        let notification = Notification {
            id: self.assign_id("ntf"),
            user_id: new.user_id,
            kind: new.kind,
            title: new.title,
            message: new.message,
            is_read: false,
            created_at: Utc::now(),
            related_id: new.related_id,
            is_cleared: false,
        };
        {
            let mut tables = self.tables.lock().unwrap();
            tables.notifications.push(notification.clone());
        }
        self.emit(ChangeEvent::insert(ChangeRecord::Notification(
            notification.clone(),
        )))
        .await;
        Ok(notification)
    }

    async fn query_notifications(&self, filters: &[Filter]) -> Result<Vec<Notification>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .notifications
            .iter()
            .filter(|n| filters.iter().all(|f| notification_matches(n, f)))
            .cloned()
            .collect())
    }

    async fn update_notifications(
        &self,
        filters: &[Filter],
        update: NotificationUpdate,
    ) -> Result<Vec<Notification>> {
        let updated: Vec<Notification> = {
            let mut tables = self.tables.lock().unwrap();
            tables
                .notifications
                .iter_mut()
                .filter(|n| filters.iter().all(|f| notification_matches(n, f)))
                .map(|row| {
                    if let Some(is_read) = update.is_read {
                        row.is_read = is_read;
                    }
                    if let Some(is_cleared) = update.is_cleared {
                        row.is_cleared = is_cleared;
                    }
                    row.clone()
                })
                .collect()
        };
        for row in &updated {
            self.emit(ChangeEvent::update(ChangeRecord::Notification(row.clone())))
                .await;
        }
        Ok(updated)
    }

    async fn delete_notifications(&self, filters: &[Filter]) -> Result<u64> {
        if self.refuse_notification_deletes.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let removed: Vec<Notification> = {
            let mut tables = self.tables.lock().unwrap();
            let (gone, kept): (Vec<Notification>, Vec<Notification>) = tables
                .notifications
                .drain(..)
                .partition(|n| filters.iter().all(|f| notification_matches(n, f)));
            tables.notifications = kept;
            gone
        };
        let count = removed.len() as u64;
        for row in removed {
            self.emit(ChangeEvent::delete(ChangeRecord::Notification(row)))
                .await;
        }
        Ok(count)
    }

    async fn insert_block(&self, new: NewBlock) -> Result<BlockEdge> {
        let edge = BlockEdge {
            id: self.assign_id("blk"),
            blocker_id: new.blocker_id,
            blocked_id: new.blocked_id,
        };
        let mut tables = self.tables.lock().unwrap();
        tables.blocks.push(edge.clone());
        Ok(edge)
    }

    async fn query_blocks(&self, filters: &[Filter]) -> Result<Vec<BlockEdge>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .blocks
            .iter()
            .filter(|edge| filters.iter().all(|f| block_matches(edge, f)))
            .cloned()
            .collect())
    }

    async fn delete_blocks(&self, filters: &[Filter]) -> Result<u64> {
        let mut tables = self.tables.lock().unwrap();
        let before = tables.blocks.len();
        tables
            .blocks
            .retain(|edge| !filters.iter().all(|f| block_matches(edge, f)));
        Ok((before - tables.blocks.len()) as u64)
    }

    async fn subscribe_changes(&self, _user_id: &str) -> Result<mpsc::Receiver<ChangeEvent>> {
        // Everything is broadcast to everyone; the client-side reconciler
        // is expected to drop rows outside its scope.
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        self.change_feeds.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn broadcast_typing(&self, ping: TypingPing) -> Result<()> {
        let senders: Vec<mpsc::Sender<TypingPing>> = {
            let feeds = self.typing_feeds.lock().unwrap();
            feeds.clone()
        };
        for tx in senders {
            let _ = tx.send(ping.clone()).await;
        }
        Ok(())
    }

    async fn subscribe_typing(&self) -> Result<mpsc::Receiver<TypingPing>> {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        self.typing_feeds.lock().unwrap().push(tx);
        Ok(rx)
    }
}

#[async_trait]
impl BlobStore for InMemoryBackend {
    async fn upload(&self, path: &Path) -> Result<String> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "blob".to_string());
        Ok(format!("https://blobs.baraholka.test/{}", name))
    }
}
