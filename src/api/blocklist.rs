use crate::error::Result;
use crate::state::AppState;

pub async fn block_user(state: &AppState, user_id: String) -> Result<()> {
    let mut blocklist = state.blocklist.write().await;
    blocklist.block_user(&user_id).await
}

pub async fn unblock_user(state: &AppState, user_id: String) -> Result<()> {
    let mut blocklist = state.blocklist.write().await;
    blocklist.unblock_user(&user_id).await
}

/// Users the session user has blocked, for the settings screen.
pub async fn get_blocked_users(state: &AppState) -> Result<Vec<String>> {
    let blocklist = state.blocklist.read().await;
    Ok(blocklist.blocked_by_me())
}

/// Whether the other side of a chat has blocked the session user. The
/// compose box hides itself on true.
pub async fn is_blocked_by(state: &AppState, user_id: String) -> Result<bool> {
    let blocklist = state.blocklist.read().await;
    Ok(!blocklist.can_message(&user_id))
}

pub async fn is_blocked(state: &AppState, user_id: String) -> Result<bool> {
    let blocklist = state.blocklist.read().await;
    Ok(blocklist.is_blocked_by_me(&user_id))
}
