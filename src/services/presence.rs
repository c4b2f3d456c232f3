//! Ephemeral typing presence.
//!
//! Typing state lives only in this tracker, isolated from the durable entity
//! store. Each incoming ping arms a per-user deadline; the deadline restarts
//! on every fresh ping and a periodic sweep expires it even when nobody
//! reads. Outgoing pings are fire-and-forget: a dropped broadcast degrades
//! the hint, nothing else.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::DataBackend;
use crate::events::{EventBus, UiEvent};
use crate::services::types::TypingPing;

pub struct PresenceTracker {
    user_id: String,
    ttl: Duration,
    backend: Arc<dyn DataBackend>,
    events: EventBus,
    /// chat id -> typing user id -> deadline.
    typing: HashMap<String, HashMap<String, Instant>>,
}

impl PresenceTracker {
    pub fn new(
        user_id: &str,
        ttl: Duration,
        backend: Arc<dyn DataBackend>,
        events: EventBus,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            ttl,
            backend,
            events,
            typing: HashMap::new(),
        }
    }

    // ── Outgoing ────────────────────────────────────────────────────────────

    pub async fn set_typing(&self, chat_id: &str) {
        let ping = TypingPing {
            chat_id: chat_id.to_string(),
            user_id: self.user_id.clone(),
            stopped: false,
        };
        if let Err(e) = self.backend.broadcast_typing(ping).await {
            log::debug!("Typing broadcast dropped: {}", e);
        }
    }

    /// Announce that the composer was cleared or the chat closed.
    pub async fn clear_typing(&self, chat_id: &str) {
        let ping = TypingPing {
            chat_id: chat_id.to_string(),
            user_id: self.user_id.clone(),
            stopped: true,
        };
        if let Err(e) = self.backend.broadcast_typing(ping).await {
            log::debug!("Typing broadcast dropped: {}", e);
        }
    }

    // ── Incoming ────────────────────────────────────────────────────────────

    pub fn note_ping(&mut self, ping: TypingPing) {
        // The viewer never sees their own indicator.
        if ping.user_id == self.user_id {
            return;
        }
        let changed = {
            let users = self.typing.entry(ping.chat_id.clone()).or_default();
            if ping.stopped {
                users.remove(&ping.user_id).is_some()
            } else {
                users.insert(ping.user_id.clone(), Instant::now() + self.ttl);
                true
            }
        };
        if self
            .typing
            .get(&ping.chat_id)
            .map(|users| users.is_empty())
            .unwrap_or(false)
        {
            self.typing.remove(&ping.chat_id);
        }
        if changed {
            let users = self.typing_users(&ping.chat_id);
            self.events.publish(UiEvent::TypingChanged {
                chat_id: ping.chat_id,
                users,
            });
        }
    }

    /// Users currently typing in a chat. Expired deadlines are filtered even
    /// before the sweep catches them.
    pub fn typing_users(&self, chat_id: &str) -> Vec<String> {
        let now = Instant::now();
        let mut users: Vec<String> = self
            .typing
            .get(chat_id)
            .map(|users| {
                users
                    .iter()
                    .filter(|(_, deadline)| **deadline > now)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        users.sort();
        users
    }

    /// Drop expired entries and tell the UI about every chat that changed.
    pub fn sweep(&mut self) {
        let now = Instant::now();
        let mut changed: Vec<String> = Vec::new();
        for (chat_id, users) in &mut self.typing {
            let before = users.len();
            users.retain(|_, deadline| *deadline > now);
            if users.len() != before {
                changed.push(chat_id.clone());
            }
        }
        self.typing.retain(|_, users| !users.is_empty());
        for chat_id in changed {
            let users = self.typing_users(&chat_id);
            self.events.publish(UiEvent::TypingChanged { chat_id, users });
        }
    }
}
