use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Avatar shown for contacts that never uploaded a profile picture.
pub const DEFAULT_AVATAR: &str = "/avatar.png";

/// A directory entry for another user one can message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(rename = "_id")]
    pub id: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_pic: Option<String>,
}

impl Contact {
    /// Avatar reference, falling back to [`DEFAULT_AVATAR`] when unset or empty
    pub fn avatar(&self) -> &str {
        match self.profile_pic.as_deref() {
            Some(pic) if !pic.is_empty() => pic,
            _ => DEFAULT_AVATAR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Body of an outgoing message. At least one of the fields is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl MessagePayload {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePayload {
            text: Some(text.into()),
            image: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.as_deref().map_or(true, str::is_empty) && self.image.is_none()
    }
}

/// Contact ids currently known to be connected.
pub type OnlineSet = HashSet<String>;

/// Per-contact count of messages received while that contact was not selected.
/// A missing entry reads as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadCounts(HashMap<String, u32>);

impl UnreadCounts {
    pub fn get(&self, contact_id: &str) -> u32 {
        self.0.get(contact_id).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, contact_id: &str) -> u32 {
        let count = self.0.entry(contact_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn reset(&mut self, contact_id: &str) {
        self.0.insert(contact_id.to_string(), 0);
    }

    /// Sum over all contacts, saturating like `increment`
    pub fn total(&self) -> u32 {
        self.0.values().copied().fold(0u32, u32::saturating_add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_saturates_like_increment() {
        let mut counts = UnreadCounts(HashMap::from([("a".to_string(), u32::MAX - 1)]));
        assert_eq!(counts.increment("a"), u32::MAX);
        assert_eq!(counts.increment("a"), u32::MAX);
        counts.increment("b");
        assert_eq!(counts.total(), u32::MAX);
    }
}
