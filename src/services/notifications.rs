//! Notification templates and panel operations.
//!
//! Templates build the rows other users receive (fan-out happens in the
//! send pipeline via the fanout queue); the service methods operate on the
//! viewer's own panel: load, mark read, clear. Clearing prefers a real
//! delete and falls back to tombstoning when backend policy silently
//! refuses the delete.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::backend::{DataBackend, Filter, NewNotification, NotificationUpdate};
use crate::error::Result;
use crate::events::{EventBus, UiEvent};
use crate::services::entity_store::EntityStore;
use crate::services::types::{
    ChangeEvent, ChangeRecord, Chat, Message, Notification, NotificationKind,
};

/// Maximum message preview length in a new-message notification.
const PREVIEW_LEN: usize = 50;

pub struct NotificationService {
    user_id: String,
    store: Arc<RwLock<EntityStore>>,
    backend: Arc<dyn DataBackend>,
    events: EventBus,
}

impl NotificationService {
    pub fn new(
        user_id: &str,
        store: Arc<RwLock<EntityStore>>,
        backend: Arc<dyn DataBackend>,
        events: EventBus,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            store,
            backend,
            events,
        }
    }

    /// Fetch the viewer's notifications and merge them into the store.
    pub async fn load_notifications(&self) -> Result<Vec<Notification>> {
        let rows = self
            .backend
            .query_notifications(&[Filter::Eq("userId", self.user_id.clone())])
            .await?;
        log::info!("Loaded {} notifications", rows.len());

        let mut store = self.store.write().await;
        for row in rows {
            // Bulk load: merge silently, one summary event at the end.
            let _ = store.apply(ChangeEvent::insert(ChangeRecord::Notification(row)));
        }
        let visible = store.notifications();
        drop(store);

        self.events.publish(UiEvent::NotificationsUpdated);
        Ok(visible)
    }

    pub async fn mark_read(&self, id: &str) -> Result<()> {
        {
            let store = self.store.read().await;
            match store.notification(id) {
                Some(n) if n.is_read => return Ok(()),
                _ => {}
            }
        }
        let rows = self
            .backend
            .update_notifications(
                &[Filter::Eq("id", id.to_string())],
                NotificationUpdate {
                    is_read: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let mut store = self.store.write().await;
        let mut events = Vec::new();
        for row in rows {
            events.extend(store.apply(ChangeEvent::update(ChangeRecord::Notification(row))));
        }
        drop(store);
        self.events.publish_all(events);
        Ok(())
    }

    /// Mark every unread notification read. Returns how many rows moved.
    pub async fn mark_all_read(&self) -> Result<u32> {
        let has_unread = {
            let store = self.store.read().await;
            store.notifications().iter().any(|n| !n.is_read)
        };
        if !has_unread {
            return Ok(0);
        }

        let rows = self
            .backend
            .update_notifications(
                &[
                    Filter::Eq("userId", self.user_id.clone()),
                    Filter::Eq("isRead", "false".to_string()),
                ],
                NotificationUpdate {
                    is_read: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        let count = rows.len() as u32;

        let mut store = self.store.write().await;
        let mut events = Vec::new();
        for row in rows {
            events.extend(store.apply(ChangeEvent::update(ChangeRecord::Notification(row))));
        }
        drop(store);
        self.events.publish_all(events);
        log::info!("Marked {} notifications read", count);
        Ok(count)
    }

    /// Remove every notification from the panel.
    pub async fn clear_all(&self) -> Result<()> {
        // 1. Snapshot what the panel currently shows
        let visible = {
            let store = self.store.read().await;
            store.notifications()
        };
        if visible.is_empty() {
            return Ok(());
        }

        // 2. Try the real delete first
        let removed = self
            .backend
            .delete_notifications(&[Filter::Eq("userId", self.user_id.clone())])
            .await?;

        let mut events = Vec::new();
        if removed > 0 {
            let mut store = self.store.write().await;
            for row in visible {
                events.extend(store.apply(ChangeEvent::delete(ChangeRecord::Notification(row))));
            }
            log::info!("Cleared {} notifications", removed);
        } else {
            // 3. Backend policy refused the delete; tombstone instead so the
            //    panel still empties
            log::warn!("Notification delete affected no rows, falling back to tombstones");
            let rows = self
                .backend
                .update_notifications(
                    &[Filter::Eq("userId", self.user_id.clone())],
                    NotificationUpdate {
                        is_read: Some(true),
                        is_cleared: Some(true),
                    },
                )
                .await?;
            let mut store = self.store.write().await;
            for row in rows {
                events.extend(store.apply(ChangeEvent::update(ChangeRecord::Notification(row))));
            }
        }
        self.events.publish_all(events);
        self.events.publish(UiEvent::NotificationsUpdated);
        Ok(())
    }

    // ── Templates ───────────────────────────────────────────────────────────

    /// New-message notifications for every chat participant except the
    /// sender.
    pub fn message_notifications(
        chat: &Chat,
        message: &Message,
        sender_name: &str,
    ) -> Vec<NewNotification> {
        chat.participants
            .iter()
            .filter(|participant| **participant != message.sender_id)
            .map(|participant| NewNotification {
                user_id: participant.clone(),
                kind: NotificationKind::NewMessage,
                title: "Новое сообщение".to_string(),
                message: format!("{}: {}", sender_name, preview(&message.content)),
                related_id: Some(chat.id.clone()),
            })
            .collect()
    }

    pub fn listing_approved(
        owner_id: &str,
        listing_id: &str,
        listing_title: &str,
    ) -> NewNotification {
        NewNotification {
            user_id: owner_id.to_string(),
            kind: NotificationKind::ListingApproved,
            title: "Объявление одобрено".to_string(),
            message: format!(
                "Ваше объявление \"{}\" прошло модерацию и опубликовано",
                listing_title
            ),
            related_id: Some(listing_id.to_string()),
        }
    }

    pub fn listing_rejected(
        owner_id: &str,
        listing_id: &str,
        listing_title: &str,
        reason: &str,
    ) -> NewNotification {
        NewNotification {
            user_id: owner_id.to_string(),
            kind: NotificationKind::ListingRejected,
            title: "Объявление отклонено".to_string(),
            message: format!(
                "Ваше объявление \"{}\" отклонено. Причина: {}",
                listing_title, reason
            ),
            related_id: Some(listing_id.to_string()),
        }
    }

    pub fn review_received(user_id: &str, review_id: &str, rating: u8) -> NewNotification {
        NewNotification {
            user_id: user_id.to_string(),
            kind: NotificationKind::NewReview,
            title: "Новый отзыв".to_string(),
            message: format!("Вы получили новый отзыв с оценкой {}/5", rating),
            related_id: Some(review_id.to_string()),
        }
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_LEN {
        let cut: String = content.chars().take(PREVIEW_LEN).collect();
        format!("{}...", cut)
    } else {
        content.to_string()
    }
}
