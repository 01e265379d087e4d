// Re-export needed modules for testing
pub mod api;
pub mod contacts;
pub mod models;
pub mod notify;
pub mod presence;
pub mod socket;
pub mod store;

// Re-export main types for convenience
pub use api::{ApiError, ChatApi, HttpChatApi};
pub use contacts::{ContactListView, ContactRow, MountedContactList};
pub use models::*;
pub use notify::{Notification, NotificationLevel, Notifier};
pub use presence::PresenceTracker;
pub use socket::{EventRegistry, EventSource, SocketClient};
pub use store::{ChatState, ChatStore, Subscription};
