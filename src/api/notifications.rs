use crate::error::Result;
use crate::services::types::Notification;
use crate::state::AppState;

pub async fn get_notifications(state: &AppState) -> Result<Vec<Notification>> {
    let store = state.store.read().await;
    Ok(store.notifications())
}

pub async fn mark_notification_read(state: &AppState, notification_id: String) -> Result<()> {
    let notifications = state.notifications.read().await;
    notifications.mark_read(&notification_id).await
}

pub async fn mark_all_notifications_read(state: &AppState) -> Result<u32> {
    let notifications = state.notifications.read().await;
    notifications.mark_all_read().await
}

pub async fn clear_notifications(state: &AppState) -> Result<()> {
    let notifications = state.notifications.read().await;
    notifications.clear_all().await
}
