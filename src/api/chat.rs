use std::path::PathBuf;

use crate::error::Result;
use crate::services::types::{Chat, Message};
use crate::state::AppState;

// ── Chat lifecycle ────────────────────────────────────────────

pub async fn start_chat(
    state: &AppState,
    other_user_id: String,
    listing_id: Option<String>,
) -> Result<Chat> {
    let chat = state.chat.read().await;
    chat.start_chat(&other_user_id, listing_id.as_deref()).await
}

pub async fn get_chats(state: &AppState) -> Result<Vec<Chat>> {
    let chat = state.chat.read().await;
    Ok(chat.chats().await)
}

pub async fn get_chat_messages(state: &AppState, chat_id: String) -> Result<Vec<Message>> {
    // Opening a thread refreshes its history from the backend.
    let chat = state.chat.read().await;
    chat.load_chat_messages(&chat_id).await
}

// ── Messaging ─────────────────────────────────────────────────

pub async fn send_chat_message(
    state: &AppState,
    chat_id: String,
    content: String,
    attachment: Option<PathBuf>,
) -> Result<Message> {
    let chat = state.chat.read().await;
    chat.send_message(&chat_id, &content, attachment.as_deref())
        .await
}

pub async fn edit_chat_message(
    state: &AppState,
    message_id: String,
    content: String,
) -> Result<Message> {
    let chat = state.chat.read().await;
    chat.edit_message(&message_id, &content).await
}

pub async fn delete_chat_message(state: &AppState, message_id: String) -> Result<()> {
    let chat = state.chat.read().await;
    chat.delete_message(&message_id).await
}

pub async fn mark_message_read(state: &AppState, message_id: String) -> Result<()> {
    let chat = state.chat.read().await;
    chat.mark_message_read(&message_id).await?;
    Ok(())
}

pub async fn mark_chat_read(state: &AppState, chat_id: String) -> Result<u32> {
    let chat = state.chat.read().await;
    chat.mark_chat_read(&chat_id).await
}

pub async fn get_unread_count(state: &AppState) -> Result<u32> {
    let chat = state.chat.read().await;
    Ok(chat.total_unread().await)
}

// ── Typing presence ───────────────────────────────────────────

pub async fn set_typing(state: &AppState, chat_id: String) -> Result<()> {
    let presence = state.presence.read().await;
    presence.set_typing(&chat_id).await;
    Ok(())
}

pub async fn clear_typing(state: &AppState, chat_id: String) -> Result<()> {
    let presence = state.presence.read().await;
    presence.clear_typing(&chat_id).await;
    Ok(())
}

pub async fn get_typing_users(state: &AppState, chat_id: String) -> Result<Vec<String>> {
    let presence = state.presence.read().await;
    Ok(presence.typing_users(&chat_id))
}
