// UI-facing operation handlers

pub mod blocklist;
pub mod chat;
pub mod moderation;
pub mod notifications;

// Re-export all operations for the bridge registration
pub use blocklist::*;
pub use chat::*;
pub use moderation::*;
pub use notifications::*;
