//! Conversation state: validation, durable persistence and reload of the message
//! history that resumed turns are sent with.

pub mod manager;
pub mod store;

pub use manager::{ConversationManager, HistorySnapshot, HISTORY_KEY};
pub use store::{FileStore, KeyValueStore, MemoryStore};
