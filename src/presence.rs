// Presence collaborator
// Mirrors the backend's online-users broadcast; read-only to the store and views.

use log::{debug, info};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

use crate::models::OnlineSet;

/// Socket event carrying the full list of connected user ids
pub const ONLINE_USERS_EVENT: &str = "getOnlineUsers";

#[derive(Debug, Clone)]
pub struct PresenceTracker {
    tx: Arc<watch::Sender<OnlineSet>>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(OnlineSet::new());
        PresenceTracker { tx: Arc::new(tx) }
    }

    pub fn online_users(&self) -> OnlineSet {
        self.tx.borrow().clone()
    }

    pub fn is_online(&self, contact_id: &str) -> bool {
        self.tx.borrow().contains(contact_id)
    }

    /// Receiver that is notified each time the online set is replaced
    pub fn subscribe(&self) -> watch::Receiver<OnlineSet> {
        self.tx.subscribe()
    }

    pub fn set_online_users<I>(&self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        let online: OnlineSet = ids.into_iter().collect();
        debug!("Presence update: {} users online", online.len());
        self.tx.send_replace(online);
    }

    /// Replace the online set from a `getOnlineUsers` payload (an array of ids)
    pub fn apply_payload(&self, payload: &Value) -> Result<usize, serde_json::Error> {
        let ids: Vec<String> = serde_json::from_value(payload.clone())?;
        let count = ids.len();
        self.set_online_users(ids);
        Ok(count)
    }

    /// Forget everyone, e.g. after the real-time connection drops
    pub fn clear(&self) {
        info!("Clearing presence information");
        self.tx.send_replace(OnlineSet::new());
    }
}
