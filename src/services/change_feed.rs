//! Consumers for the realtime feeds.
//!
//! The backend pushes every row change in the session user's scope; the
//! workers here reconcile each row against the local view before it reaches
//! the reducer, then forward whatever UI events the merge produced. Rows
//! that cannot belong to this session (foreign chats, messages for threads
//! we do not hold, other users' notifications) are dropped at the door.

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::events::{EventBus, UiEvent};
use crate::services::entity_store::EntityStore;
use crate::services::presence::PresenceTracker;
use crate::services::types::{ChangeEvent, ChangeRecord, TypingPing};

pub struct ChangeFeedWorker {
    viewer_id: String,
    store: Arc<RwLock<EntityStore>>,
    events: EventBus,
    /// When off, incoming-message events are swallowed; chat list and
    /// unread updates still flow.
    notify_on_message: bool,
}

impl ChangeFeedWorker {
    pub fn new(
        viewer_id: &str,
        store: Arc<RwLock<EntityStore>>,
        events: EventBus,
        notify_on_message: bool,
    ) -> Self {
        Self {
            viewer_id: viewer_id.to_string(),
            store,
            events,
            notify_on_message,
        }
    }

    /// Drain the feed until the backend closes it.
    pub async fn run(self, mut feed: mpsc::Receiver<ChangeEvent>) {
        while let Some(event) = feed.recv().await {
            self.handle(event).await;
        }
        log::warn!("Change feed closed");
    }

    async fn handle(&self, event: ChangeEvent) {
        if !self.accepts(&event).await {
            return;
        }
        let mut ui_events = {
            let mut store = self.store.write().await;
            store.apply(event)
        };
        if !self.notify_on_message {
            ui_events.retain(|event| match event {
                UiEvent::MessageReceived { message, .. } => message.sender_id == self.viewer_id,
                _ => true,
            });
        }
        self.events.publish_all(ui_events);
    }

    /// Feed rows are scoped server side, but a reconnect can replay rows
    /// from before a chat was deleted locally. Filter again here.
    async fn accepts(&self, event: &ChangeEvent) -> bool {
        match &event.record {
            ChangeRecord::Chat(chat) => {
                if chat.involves(&self.viewer_id) {
                    true
                } else {
                    log::debug!("Dropping feed row for foreign chat {}", chat.id);
                    false
                }
            }
            ChangeRecord::Message(message) => {
                let store = self.store.read().await;
                if store.contains_chat(&message.chat_id) {
                    true
                } else {
                    log::debug!(
                        "Dropping message {} for unknown chat {}",
                        message.id,
                        message.chat_id
                    );
                    false
                }
            }
            ChangeRecord::Notification(notification) => {
                if notification.user_id == self.viewer_id {
                    true
                } else {
                    log::debug!(
                        "Dropping notification {} addressed to {}",
                        notification.id,
                        notification.user_id
                    );
                    false
                }
            }
        }
    }
}

/// Forwards typing pings from the realtime feed into the presence tracker.
pub struct TypingFeedWorker {
    presence: Arc<RwLock<PresenceTracker>>,
}

impl TypingFeedWorker {
    pub fn new(presence: Arc<RwLock<PresenceTracker>>) -> Self {
        Self { presence }
    }

    pub async fn run(self, mut feed: mpsc::Receiver<TypingPing>) {
        while let Some(ping) = feed.recv().await {
            let mut presence = self.presence.write().await;
            presence.note_ping(ping);
        }
        log::warn!("Typing feed closed");
    }
}
