use crate::error::Result;
use crate::services::types::Message;
use crate::services::NotificationService;
use crate::state::AppState;

// Moderation and review outcomes notify their subjects through the same
// retrying fan-out queue as chat messages.

pub async fn notify_listing_approved(
    state: &AppState,
    owner_id: String,
    listing_id: String,
    listing_title: String,
) -> Result<()> {
    let payload = NotificationService::listing_approved(&owner_id, &listing_id, &listing_title);
    let mut fanout = state.fanout.write().await;
    fanout.enqueue(payload);
    Ok(())
}

pub async fn notify_listing_rejected(
    state: &AppState,
    owner_id: String,
    listing_id: String,
    listing_title: String,
    reason: String,
) -> Result<()> {
    let payload =
        NotificationService::listing_rejected(&owner_id, &listing_id, &listing_title, &reason);
    let mut fanout = state.fanout.write().await;
    fanout.enqueue(payload);
    Ok(())
}

pub async fn notify_review_received(
    state: &AppState,
    user_id: String,
    review_id: String,
    rating: u8,
) -> Result<()> {
    let payload = NotificationService::review_received(&user_id, &review_id, rating);
    let mut fanout = state.fanout.write().await;
    fanout.enqueue(payload);
    Ok(())
}

/// Post a platform notice into a chat, e.g. "listing sold" once a deal
/// closes.
pub async fn send_system_message(
    state: &AppState,
    chat_id: String,
    content: String,
) -> Result<Message> {
    let chat = state.chat.read().await;
    chat.send_system_message(&chat_id, &content).await
}

/// Take a chat thread down outright, cascading its messages on every
/// client. Participant surfaces delete single messages instead.
pub async fn delete_chat(state: &AppState, chat_id: String) -> Result<()> {
    let chat = state.chat.read().await;
    chat.delete_chat(&chat_id).await
}
