use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::backend::{BlobStore, DataBackend, HttpBackend, HttpBlobStore};
use crate::error::Result;
use crate::events::EventBus;
use crate::services::{
    BlockListService, ChatService, ConfigService, EntityStore, FanoutQueue, NotificationService,
    PresenceTracker, SessionUser,
};

/// Global application state shared by the API layer and background tasks.
pub struct AppState {
    pub session: SessionUser,
    pub config: Arc<RwLock<ConfigService>>,
    pub store: Arc<RwLock<EntityStore>>,
    pub chat: Arc<RwLock<ChatService>>,
    pub blocklist: Arc<RwLock<BlockListService>>,
    pub presence: Arc<RwLock<PresenceTracker>>,
    pub notifications: Arc<RwLock<NotificationService>>,
    pub fanout: Arc<RwLock<FanoutQueue>>,
    pub backend: Arc<dyn DataBackend>,
    pub events: EventBus,
}

impl AppState {
    /// Wire the services around an already-built backend pair. Tests hand
    /// in mock backends through here.
    pub fn new(
        config_service: ConfigService,
        backend: Arc<dyn DataBackend>,
        blob_store: Arc<dyn BlobStore>,
        session: SessionUser,
    ) -> Self {
        let app_config = config_service.get();

        log::info!(
            "Initializing session for {} against {}",
            session.id,
            app_config.backend.base_url
        );

        let events = EventBus::new();
        let store = Arc::new(RwLock::new(EntityStore::new(&session.id)));

        let blocklist = Arc::new(RwLock::new(BlockListService::new(
            &session.id,
            backend.clone(),
            events.clone(),
        )));

        let presence = Arc::new(RwLock::new(PresenceTracker::new(
            &session.id,
            Duration::from_secs(app_config.chat.typing_ttl_secs),
            backend.clone(),
            events.clone(),
        )));

        let fanout = Arc::new(RwLock::new(FanoutQueue::new(app_config.fanout.max_retries)));

        let notifications = Arc::new(RwLock::new(NotificationService::new(
            &session.id,
            store.clone(),
            backend.clone(),
            events.clone(),
        )));

        let chat = Arc::new(RwLock::new(ChatService::new(
            session.clone(),
            store.clone(),
            backend.clone(),
            blob_store,
            blocklist.clone(),
            fanout.clone(),
            events.clone(),
            app_config.chat.max_message_size,
        )));

        Self {
            session,
            config: Arc::new(RwLock::new(config_service)),
            store,
            chat,
            blocklist,
            presence,
            notifications,
            fanout,
            backend,
            events,
        }
    }

    /// Build the state against the HTTP backend from persisted settings.
    pub fn init(session: SessionUser) -> Result<Self> {
        let config_service = ConfigService::new();
        let settings = config_service.get().backend.clone();
        let backend: Arc<dyn DataBackend> = Arc::new(HttpBackend::new(&settings)?);
        let blob_store: Arc<dyn BlobStore> = Arc::new(HttpBlobStore::new(&settings)?);
        Ok(Self::new(config_service, backend, blob_store, session))
    }
}
