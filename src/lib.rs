//! Baraholka client core.
//!
//! The messaging, notification, and blocklist engine behind the Baraholka
//! classifieds app. The embedding shell builds an [`AppState`], calls
//! [`start_session`] once after login, and drives the operations in
//! [`api`]; reactive updates arrive over the [`events::EventBus`].

pub mod api;
pub mod backend;
mod error;
pub mod events;
pub mod services;
mod state;

pub use error::{BaraholkaError, Result};
pub use events::{EventBus, UiEvent};
pub use services::types::SessionUser;
pub use state::AppState;

use services::{ChangeFeedWorker, TypingFeedWorker};

static LOG_INIT: std::sync::Once = std::sync::Once::new();

/// Install the env_logger subscriber. Later calls are no-ops, so tests and
/// the shell can both call it.
pub fn init_logging() {
    LOG_INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    });
}

/// Load the session user's data and start the background loops: the two
/// realtime feed pumps, the presence sweep, and the notification fan-out
/// processor. Call once per login.
pub async fn start_session(state: &AppState) -> Result<()> {
    log::info!(
        "Baraholka client v{} starting session for {}",
        env!("CARGO_PKG_VERSION"),
        state.session.id
    );

    // Load the durable state before the feeds start; anything that lands
    // in between is picked up by the per-chat refresh on open.
    {
        let mut blocklist = state.blocklist.write().await;
        blocklist.refresh().await?;
    }
    {
        let chat = state.chat.read().await;
        chat.bootstrap().await?;
    }
    {
        let notifications = state.notifications.read().await;
        notifications.load_notifications().await?;
    }

    let notify_on_message = {
        let config = state.config.read().await;
        config.get().chat.notify_on_message
    };

    // Change feed pump
    let change_feed = state.backend.subscribe_changes(&state.session.id).await?;
    let change_worker = ChangeFeedWorker::new(
        &state.session.id,
        state.store.clone(),
        state.events.clone(),
        notify_on_message,
    );
    tokio::spawn(async move {
        change_worker.run(change_feed).await;
    });
    log::info!("Change feed pump started");

    // Typing feed pump
    let typing_feed = state.backend.subscribe_typing().await?;
    let typing_worker = TypingFeedWorker::new(state.presence.clone());
    tokio::spawn(async move {
        typing_worker.run(typing_feed).await;
    });
    log::info!("Typing feed pump started");

    // Presence expiry sweep (1s loop)
    let presence = state.presence.clone();
    tokio::spawn(async move {
        loop {
            {
                let mut presence = presence.write().await;
                presence.sweep();
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
        }
    });
    log::info!("Presence sweep started");

    // Notification fan-out processor (1s loop, same cadence as the sweep)
    let chat = state.chat.clone();
    tokio::spawn(async move {
        loop {
            {
                let chat = chat.read().await;
                chat.process_fanout().await;
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
        }
    });
    log::info!("Notification fan-out processor started");

    Ok(())
}
