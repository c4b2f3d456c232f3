//! Directional user blocking.
//!
//! A block is a one-way edge: when B blocks A, A can no longer message B,
//! while B keeps the right to message A until A blocks back. The service
//! caches both directions locally so the send pipeline can gate without a
//! network round trip; the cache refreshes at session start and after every
//! block or unblock.

use std::collections::HashSet;
use std::sync::Arc;

use crate::backend::{DataBackend, Filter, NewBlock};
use crate::error::Result;
use crate::events::{EventBus, UiEvent};

pub struct BlockListService {
    user_id: String,
    backend: Arc<dyn DataBackend>,
    events: EventBus,
    /// Users who have blocked the session user. Restricts outgoing sends.
    blocked_me: HashSet<String>,
    /// Users the session user has blocked. Drives the block/unblock menu.
    blocked_by_me: HashSet<String>,
}

impl BlockListService {
    pub fn new(user_id: &str, backend: Arc<dyn DataBackend>, events: EventBus) -> Self {
        Self {
            user_id: user_id.to_string(),
            backend,
            events,
            blocked_me: HashSet::new(),
            blocked_by_me: HashSet::new(),
        }
    }

    /// Reload both block directions from the backend.
    pub async fn refresh(&mut self) -> Result<()> {
        let blockers = self
            .backend
            .query_blocks(&[Filter::Eq("blockedId", self.user_id.clone())])
            .await?;
        self.blocked_me = blockers.into_iter().map(|edge| edge.blocker_id).collect();

        let blocked = self
            .backend
            .query_blocks(&[Filter::Eq("blockerId", self.user_id.clone())])
            .await?;
        self.blocked_by_me = blocked.into_iter().map(|edge| edge.blocked_id).collect();

        log::info!(
            "Block lists refreshed: {} blocked me, {} blocked by me",
            self.blocked_me.len(),
            self.blocked_by_me.len()
        );
        Ok(())
    }

    pub async fn block_user(&mut self, user_id: &str) -> Result<()> {
        if self.blocked_by_me.contains(user_id) {
            return Ok(());
        }
        self.backend
            .insert_block(NewBlock {
                blocker_id: self.user_id.clone(),
                blocked_id: user_id.to_string(),
            })
            .await?;
        self.blocked_by_me.insert(user_id.to_string());
        self.events.publish(UiEvent::BlocklistChanged);
        log::info!("Blocked user {}", user_id);
        Ok(())
    }

    pub async fn unblock_user(&mut self, user_id: &str) -> Result<()> {
        let removed = self
            .backend
            .delete_blocks(&[
                Filter::Eq("blockerId", self.user_id.clone()),
                Filter::Eq("blockedId", user_id.to_string()),
            ])
            .await?;
        let was_cached = self.blocked_by_me.remove(user_id);
        if was_cached || removed > 0 {
            self.events.publish(UiEvent::BlocklistChanged);
            log::info!("Unblocked user {}", user_id);
        }
        Ok(())
    }

    /// Whether the session user may message the recipient. Only the
    /// recipient's edge matters for sending.
    pub fn can_message(&self, recipient_id: &str) -> bool {
        !self.blocked_me.contains(recipient_id)
    }

    pub fn is_blocked_by_me(&self, user_id: &str) -> bool {
        self.blocked_by_me.contains(user_id)
    }

    /// Users who have blocked the session user, sorted for stable display.
    pub fn blocked_me(&self) -> Vec<String> {
        let mut list: Vec<String> = self.blocked_me.iter().cloned().collect();
        list.sort();
        list
    }

    pub fn blocked_by_me(&self) -> Vec<String> {
        let mut list: Vec<String> = self.blocked_by_me.iter().cloned().collect();
        list.sort();
        list
    }
}
