//! The messaging pipeline.
//!
//! All durable chat writes funnel through here: validate, gate on blocks,
//! upload attachments, write to the backend, then dispatch the confirmed
//! row through the entity store reducer. The UI shows nothing until the
//! backend confirms; the later feed echo of the same row merges as a no-op.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::backend::{BlobStore, DataBackend, Filter, MessageUpdate, NewChat, NewMessage};
use crate::error::{BaraholkaError, Result};
use crate::events::{EventBus, UiEvent};
use crate::services::blocklist::BlockListService;
use crate::services::entity_store::EntityStore;
use crate::services::fanout::FanoutQueue;
use crate::services::notifications::NotificationService;
use crate::services::types::{ChangeEvent, ChangeRecord, Chat, Message, SessionUser, ThreadKey};

pub struct ChatService {
    session: SessionUser,
    store: Arc<RwLock<EntityStore>>,
    backend: Arc<dyn DataBackend>,
    blob_store: Arc<dyn BlobStore>,
    blocklist: Arc<RwLock<BlockListService>>,
    fanout: Arc<RwLock<FanoutQueue>>,
    events: EventBus,
    /// Max message content size in bytes (from ChatSettings).
    max_message_size: usize,
}

impl ChatService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: SessionUser,
        store: Arc<RwLock<EntityStore>>,
        backend: Arc<dyn DataBackend>,
        blob_store: Arc<dyn BlobStore>,
        blocklist: Arc<RwLock<BlockListService>>,
        fanout: Arc<RwLock<FanoutQueue>>,
        events: EventBus,
        max_message_size: usize,
    ) -> Self {
        Self {
            session,
            store,
            backend,
            blob_store,
            blocklist,
            fanout,
            events,
            max_message_size,
        }
    }

    pub fn session(&self) -> &SessionUser {
        &self.session
    }

    /// Apply one confirmed change through the reducer and publish whatever
    /// it produced.
    async fn dispatch(&self, event: ChangeEvent) {
        let events = {
            let mut store = self.store.write().await;
            store.apply(event)
        };
        self.events.publish_all(events);
    }

    async fn publish_unread(&self) {
        let (total, by_chat) = {
            let store = self.store.read().await;
            (store.total_unread(), store.unread_by_chat())
        };
        self.events.publish(UiEvent::UnreadCount { total, by_chat });
    }

    // ── Bootstrap ──────────────────────────────────────────────

    /// Load the session user's chats and their message history into the
    /// store. Rows merge silently; one unread summary event at the end.
    pub async fn bootstrap(&self) -> Result<(usize, usize)> {
        let chats = self
            .backend
            .query_chats(&[Filter::Contains(
                "participants",
                vec![self.session.id.clone()],
            )])
            .await?;
        let chat_ids: Vec<String> = chats.iter().map(|chat| chat.id.clone()).collect();

        let messages = if chat_ids.is_empty() {
            Vec::new()
        } else {
            self.backend
                .query_messages(&[Filter::In("chatId", chat_ids)])
                .await?
        };

        let (chat_count, message_count) = (chats.len(), messages.len());
        {
            let mut store = self.store.write().await;
            for chat in chats {
                let _ = store.apply(ChangeEvent::insert(ChangeRecord::Chat(chat)));
            }
            for message in messages {
                let _ = store.apply(ChangeEvent::insert(ChangeRecord::Message(message)));
            }
        }
        self.publish_unread().await;
        log::info!(
            "Bootstrapped {} chats with {} messages",
            chat_count,
            message_count
        );
        Ok((chat_count, message_count))
    }

    // ── Chat lifecycle ─────────────────────────────────────────

    /// Open a thread with another user, reusing the existing chat row when
    /// one matches the (participants, listing) key.
    pub async fn start_chat(&self, other_user_id: &str, listing_id: Option<&str>) -> Result<Chat> {
        // 1. Reuse before insert, local store first
        let key = ThreadKey::new(&self.session.id, other_user_id, listing_id);
        {
            let store = self.store.read().await;
            if let Some(existing) = store.find_chat(&key) {
                return Ok(existing.clone());
            }
        }

        // 2. The other side may have created the row already
        let remote = self
            .backend
            .query_chats(&[Filter::Contains(
                "participants",
                vec![self.session.id.clone(), other_user_id.to_string()],
            )])
            .await?;
        if let Some(found) = remote
            .into_iter()
            .filter(|chat| chat.thread_key() == key)
            .min_by(|a, b| a.id.cmp(&b.id))
        {
            self.dispatch(ChangeEvent::insert(ChangeRecord::Chat(found.clone())))
                .await;
            let store = self.store.read().await;
            return Ok(store.chat(&found.id).cloned().unwrap_or(found));
        }

        // 3. Create on the backend, then merge the confirmed row
        let chat = self
            .backend
            .insert_chat(NewChat {
                participants: vec![self.session.id.clone(), other_user_id.to_string()],
                listing_id: listing_id.map(|id| id.to_string()),
            })
            .await?;
        log::info!("Started chat {} with {}", chat.id, other_user_id);
        self.dispatch(ChangeEvent::insert(ChangeRecord::Chat(chat.clone())))
            .await;

        let store = self.store.read().await;
        Ok(store.chat(&chat.id).cloned().unwrap_or(chat))
    }

    /// Remove a chat and its history for every participant. Moderation
    /// flows only; participant surfaces never call this. The row is
    /// resolved on the backend since the session store only holds the
    /// caller's own chats.
    pub async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        let chat = self
            .backend
            .query_chats(&[Filter::Eq("id", chat_id.to_string())])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BaraholkaError::NotFound(format!("chat {}", chat_id)))?;
        self.backend.delete_chat(chat_id).await?;
        // Cascades locally when the store holds the chat; other clients
        // cascade off the feed echo.
        self.dispatch(ChangeEvent::delete(ChangeRecord::Chat(chat)))
            .await;
        log::info!("Deleted chat {}", chat_id);
        Ok(())
    }

    /// Refresh one chat's message history from the backend.
    pub async fn load_chat_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        {
            let store = self.store.read().await;
            if !store.contains_chat(chat_id) {
                return Err(BaraholkaError::NotFound(format!("chat {}", chat_id)));
            }
        }
        let rows = self
            .backend
            .query_messages(&[Filter::Eq("chatId", chat_id.to_string())])
            .await?;
        let messages = {
            let mut store = self.store.write().await;
            for row in rows {
                let _ = store.apply(ChangeEvent::insert(ChangeRecord::Message(row)));
            }
            store.messages(chat_id)
        };
        self.publish_unread().await;
        Ok(messages)
    }

    // ── Messaging pipeline ─────────────────────────────────────

    /// Send a message, optionally with a file attachment.
    pub async fn send_message(
        &self,
        chat_id: &str,
        content: &str,
        attachment: Option<&Path>,
    ) -> Result<Message> {
        let content = content.trim();

        // 1. Validate the payload
        if content.is_empty() && attachment.is_none() {
            return Err(BaraholkaError::EmptyMessage);
        }
        if content.len() > self.max_message_size {
            return Err(BaraholkaError::MessageTooLong(
                content.len(),
                self.max_message_size,
            ));
        }

        // 2. The chat must already exist locally
        let chat = {
            let store = self.store.read().await;
            store
                .chat(chat_id)
                .cloned()
                .ok_or_else(|| BaraholkaError::NotFound(format!("chat {}", chat_id)))?
        };

        // 3. Gate on the recipient's block edge
        if let Some(recipient) = chat.other_participant(&self.session.id) {
            let blocklist = self.blocklist.read().await;
            if !blocklist.can_message(recipient) {
                return Err(BaraholkaError::RecipientBlocked);
            }
        }

        // 4. Upload the attachment before touching the messages table
        let attachment_url = match attachment {
            Some(path) => Some(self.blob_store.upload(path).await?),
            None => None,
        };

        // 5. Write the row; the backend assigns id and timestamp
        let message = self
            .backend
            .insert_message(NewMessage {
                chat_id: chat_id.to_string(),
                sender_id: self.session.id.clone(),
                content: content.to_string(),
                attachment_url,
                is_system: false,
                read_by: vec![self.session.id.clone()],
            })
            .await?;
        log::info!("Sent message {} to chat {}", message.id, chat_id);

        // 6. The confirmed row reaches the store the same way feed events do
        self.dispatch(ChangeEvent::insert(ChangeRecord::Message(message.clone())))
            .await;

        // 7. Queue notifications for the other participants; a failing
        //    fan-out never fails the send
        let payloads = NotificationService::message_notifications(
            &chat,
            &message,
            &self.session.display_name,
        );
        if !payloads.is_empty() {
            let mut fanout = self.fanout.write().await;
            fanout.enqueue_all(payloads);
        }

        let store = self.store.read().await;
        Ok(store.message(&message.id).cloned().unwrap_or(message))
    }

    /// Drop a platform notice into a chat. Skips the block gate and the
    /// notification fan-out.
    pub async fn send_system_message(&self, chat_id: &str, content: &str) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(BaraholkaError::EmptyMessage);
        }
        {
            let store = self.store.read().await;
            if !store.contains_chat(chat_id) {
                return Err(BaraholkaError::NotFound(format!("chat {}", chat_id)));
            }
        }
        let message = self
            .backend
            .insert_message(NewMessage {
                chat_id: chat_id.to_string(),
                sender_id: self.session.id.clone(),
                content: content.to_string(),
                attachment_url: None,
                is_system: true,
                read_by: vec![self.session.id.clone()],
            })
            .await?;
        log::info!("Posted system message {} to chat {}", message.id, chat_id);
        self.dispatch(ChangeEvent::insert(ChangeRecord::Message(message.clone())))
            .await;
        Ok(message)
    }

    /// Replace a message's content. Sender only; system messages and
    /// tombstones refuse.
    pub async fn edit_message(&self, message_id: &str, new_content: &str) -> Result<Message> {
        let new_content = new_content.trim();
        if new_content.is_empty() {
            return Err(BaraholkaError::EmptyMessage);
        }
        let current = {
            let store = self.store.read().await;
            store
                .message(message_id)
                .cloned()
                .ok_or_else(|| BaraholkaError::NotFound(format!("message {}", message_id)))?
        };
        if !current.can_modify(&self.session.id) {
            return Err(BaraholkaError::PermissionDenied(
                "only the sender can edit a message".to_string(),
            ));
        }
        if current.is_deleted {
            return Err(BaraholkaError::ChatError(
                "cannot edit a deleted message".to_string(),
            ));
        }
        // Re-submitting the same text must not flip the edited marker.
        if current.content == new_content {
            return Ok(current);
        }

        let row = self
            .backend
            .update_message(
                message_id,
                MessageUpdate {
                    content: Some(new_content.to_string()),
                    is_edited: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        self.dispatch(ChangeEvent::update(ChangeRecord::Message(row.clone())))
            .await;

        let store = self.store.read().await;
        Ok(store.message(message_id).cloned().unwrap_or(row))
    }

    /// Tombstone a message. Sender only; repeating is a no-op.
    pub async fn delete_message(&self, message_id: &str) -> Result<()> {
        let current = {
            let store = self.store.read().await;
            store
                .message(message_id)
                .cloned()
                .ok_or_else(|| BaraholkaError::NotFound(format!("message {}", message_id)))?
        };
        if !current.can_modify(&self.session.id) {
            return Err(BaraholkaError::PermissionDenied(
                "only the sender can delete a message".to_string(),
            ));
        }
        if current.is_deleted {
            return Ok(());
        }

        let row = self
            .backend
            .update_message(
                message_id,
                MessageUpdate {
                    content: Some(String::new()),
                    is_deleted: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        log::info!("Deleted message {}", message_id);
        self.dispatch(ChangeEvent::update(ChangeRecord::Message(row)))
            .await;
        Ok(())
    }

    // ── Read receipts ──────────────────────────────────────────

    /// Add the session user to a message's read set. Returns whether a
    /// receipt was written; already-read messages are left alone.
    pub async fn mark_message_read(&self, message_id: &str) -> Result<bool> {
        let current = {
            let store = self.store.read().await;
            store
                .message(message_id)
                .cloned()
                .ok_or_else(|| BaraholkaError::NotFound(format!("message {}", message_id)))?
        };
        if current.is_read_by(&self.session.id) {
            return Ok(false);
        }
        let mut read_by = current.read_by;
        read_by.push(self.session.id.clone());
        let row = self
            .backend
            .update_message(
                message_id,
                MessageUpdate {
                    read_by: Some(read_by),
                    ..Default::default()
                },
            )
            .await?;
        self.dispatch(ChangeEvent::update(ChangeRecord::Message(row)))
            .await;
        Ok(true)
    }

    /// Mark every unread message in a chat as read by the session user.
    /// Returns how many receipts were written.
    pub async fn mark_chat_read(&self, chat_id: &str) -> Result<u32> {
        let unread: Vec<String> = {
            let store = self.store.read().await;
            store
                .messages(chat_id)
                .into_iter()
                .filter(|message| {
                    message.sender_id != self.session.id
                        && !message.is_deleted
                        && !message.is_read_by(&self.session.id)
                })
                .map(|message| message.id)
                .collect()
        };
        if unread.is_empty() {
            return Ok(0);
        }

        let mut count = 0u32;
        for id in &unread {
            if self.mark_message_read(id).await? {
                count += 1;
            }
        }
        log::info!("Marked {} messages read in chat {}", count, chat_id);
        Ok(count)
    }

    // ── Queries ────────────────────────────────────────────────

    pub async fn chats(&self) -> Vec<Chat> {
        let store = self.store.read().await;
        store.chats()
    }

    pub async fn chat(&self, chat_id: &str) -> Option<Chat> {
        let store = self.store.read().await;
        store.chat(chat_id).cloned()
    }

    pub async fn messages(&self, chat_id: &str) -> Vec<Message> {
        let store = self.store.read().await;
        store.messages(chat_id)
    }

    pub async fn total_unread(&self) -> u32 {
        let store = self.store.read().await;
        store.total_unread()
    }

    // ── Fan-out ────────────────────────────────────────────────

    /// Drain the notification queue once. Ready items come out under the
    /// lock and are delivered with it released, then failures go back in
    /// with their backoff armed. Called from the background loop.
    pub async fn process_fanout(&self) -> (usize, usize) {
        let ready = {
            let mut fanout = self.fanout.write().await;
            fanout.take_ready()
        };
        if ready.is_empty() {
            return (0, 0);
        }

        let mut delivered = 0;
        let mut failed = Vec::new();
        for item in ready {
            match self.backend.insert_notification(item.payload.clone()).await {
                Ok(_) => {
                    log::info!(
                        "Delivered notification {} to {}",
                        item.id,
                        item.payload.user_id
                    );
                    delivered += 1;
                }
                Err(error) => failed.push((item, error)),
            }
        }

        let mut dropped = 0;
        if !failed.is_empty() {
            let mut fanout = self.fanout.write().await;
            for (item, error) in failed {
                if let Some((payload, last_error)) = fanout.requeue(item, &error) {
                    log::error!(
                        "Gave up on {:?} notification for {}: {}",
                        payload.kind,
                        payload.user_id,
                        last_error
                    );
                    dropped += 1;
                }
            }
        }
        (delivered, dropped)
    }
}
