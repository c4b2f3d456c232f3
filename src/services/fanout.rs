//! Notification fan-out queue with exponential backoff retry.
//!
//! Message sends enqueue recipient notifications here instead of writing
//! them inline, so a slow or failing notification insert can never delay or
//! fail the send itself. A background task takes the ready items, runs the
//! deliveries with the queue unlocked, and hands failures back.

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::backend::NewNotification;
use crate::error::BaraholkaError;

/// A notification row waiting to be written to the backend.
#[derive(Debug, Clone)]
pub struct PendingNotification {
    pub id: String,
    pub payload: NewNotification,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PendingNotification {
    /// Backoff delay: immediate first try, then 5s, 15s, 45s, 2min, capped
    /// at 5min.
    fn backoff_duration(&self) -> Duration {
        let secs = match self.retry_count {
            0 => 0,
            1 => 5,
            2 => 15,
            3 => 45,
            4 => 120,
            _ => 300,
        };
        Duration::from_secs(secs)
    }

    fn is_ready_for_retry(&self) -> bool {
        if let Some(last) = self.last_attempt {
            let elapsed = Utc::now().signed_duration_since(last);
            elapsed.to_std().unwrap_or(Duration::ZERO) >= self.backoff_duration()
        } else {
            true // Never attempted
        }
    }
}

/// Queue of notification writes pending delivery.
pub struct FanoutQueue {
    pending: Vec<PendingNotification>,
    max_retries: u32,
}

impl FanoutQueue {
    pub fn new(max_retries: u32) -> Self {
        Self {
            pending: Vec::new(),
            max_retries,
        }
    }

    pub fn enqueue(&mut self, payload: NewNotification) {
        log::info!(
            "Enqueued {:?} notification for {}",
            payload.kind,
            payload.user_id
        );
        self.pending.push(PendingNotification {
            id: Uuid::new_v4().to_string(),
            payload,
            retry_count: 0,
            max_retries: self.max_retries,
            last_attempt: None,
            created_at: Utc::now(),
        });
    }

    pub fn enqueue_all<I>(&mut self, payloads: I)
    where
        I: IntoIterator<Item = NewNotification>,
    {
        for payload in payloads {
            self.enqueue(payload);
        }
    }

    /// Take every item whose backoff window has elapsed off the queue.
    /// The caller owns delivery and hands failures back via
    /// [`FanoutQueue::requeue`].
    pub fn take_ready(&mut self) -> Vec<PendingNotification> {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|item| item.is_ready_for_retry());
        self.pending = waiting;
        ready
    }

    /// Record a failed delivery. The item re-enters the queue with its
    /// backoff armed, or comes back as a dropped payload once its retries
    /// run out.
    pub fn requeue(
        &mut self,
        mut item: PendingNotification,
        error: &BaraholkaError,
    ) -> Option<(NewNotification, String)> {
        item.retry_count += 1;
        item.last_attempt = Some(Utc::now());
        log::warn!(
            "Notification {} failed: {} (retry {}/{})",
            item.id,
            error,
            item.retry_count,
            item.max_retries
        );
        if item.retry_count >= item.max_retries {
            log::error!(
                "Notification {} dropped after {} attempts",
                item.id,
                item.retry_count
            );
            Some((item.payload, error.to_string()))
        } else {
            self.pending.push(item);
            None
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
