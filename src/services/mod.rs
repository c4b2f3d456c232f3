// Service layer - the entity store plus the actors that feed it

pub mod blocklist;
pub mod change_feed;
pub mod chat_service;
pub mod config;
pub mod entity_store;
pub mod fanout;
pub mod notifications;
pub mod presence;
pub mod types;

pub use blocklist::BlockListService;
pub use change_feed::{ChangeFeedWorker, TypingFeedWorker};
pub use chat_service::ChatService;
pub use config::ConfigService;
pub use entity_store::EntityStore;
pub use fanout::FanoutQueue;
pub use notifications::NotificationService;
pub use presence::PresenceTracker;
pub use types::SessionUser;
