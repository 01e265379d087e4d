// Common test utilities for integration tests
// In-memory backend and helpers shared by the store and contact list tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::LevelFilter;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::time::{timeout, Duration};

use chatterline::{
    ApiError, ChatApi, ChatState, ChatStore, Contact, EventRegistry, Message, MessagePayload, Notification,
    Notifier,
};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// Scriptable stand-in for the HTTP backend
#[derive(Default)]
pub struct MockApi {
    contacts: Mutex<Vec<Contact>>,
    transcripts: Mutex<HashMap<String, Vec<Message>>>,
    /// `Some(message)` makes every request fail with that backend message
    failure: Mutex<Option<Option<String>>>,
    gate: Mutex<Option<Arc<Notify>>>,
    sent: Mutex<Vec<(String, MessagePayload)>>,
    calls: AtomicUsize,
}

impl MockApi {
    pub fn with_contacts(contacts: Vec<Contact>) -> Self {
        let api = MockApi::default();
        *api.contacts.lock().unwrap() = contacts;
        api
    }

    pub fn set_transcript(&self, contact_id: &str, messages: Vec<Message>) {
        self.transcripts.lock().unwrap().insert(contact_id.to_string(), messages);
    }

    /// Fail subsequent requests; `None` means the backend gave no message
    pub fn fail_with(&self, message: Option<&str>) {
        *self.failure.lock().unwrap() = Some(message.map(str::to_string));
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Park every request until the returned handle is notified
    pub fn hold_requests(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn sent(&self) -> Vec<(String, MessagePayload)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(ApiError::Status { status: 500, message }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatApi for MockApi {
    async fn fetch_contacts(&self) -> Result<Vec<Contact>, ApiError> {
        self.enter().await?;
        Ok(self.contacts.lock().unwrap().clone())
    }

    async fn fetch_transcript(&self, contact_id: &str) -> Result<Vec<Message>, ApiError> {
        self.enter().await?;
        Ok(self.transcripts.lock().unwrap().get(contact_id).cloned().unwrap_or_default())
    }

    async fn send_message(&self, contact_id: &str, payload: &MessagePayload) -> Result<Message, ApiError> {
        self.enter().await?;
        let mut sent = self.sent.lock().unwrap();
        sent.push((contact_id.to_string(), payload.clone()));
        Ok(Message {
            id: format!("sent-{}", sent.len()),
            sender_id: "me".to_string(),
            receiver_id: contact_id.to_string(),
            text: payload.text.clone(),
            image: payload.image.clone(),
            created_at: Utc::now(),
        })
    }
}

pub struct TestHarness {
    pub store: ChatStore,
    pub api: Arc<MockApi>,
    pub events: Arc<EventRegistry>,
    pub notifications: mpsc::UnboundedReceiver<Notification>,
}

impl TestHarness {
    pub fn new(api: MockApi) -> Self {
        setup_logging();
        let api = Arc::new(api);
        let events = Arc::new(EventRegistry::new());
        let (notifier, notifications) = Notifier::new();
        let store = ChatStore::new(api.clone(), notifier);
        store.attach_transport(events.clone());
        TestHarness {
            store,
            api,
            events,
            notifications,
        }
    }

    /// Texts of all notifications raised so far
    pub fn drain_notifications(&mut self) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            texts.push(notification.text);
        }
        texts
    }
}

pub fn contact(id: &str, name: &str) -> Contact {
    Contact {
        id: id.to_string(),
        full_name: name.to_string(),
        email: None,
        profile_pic: None,
    }
}

pub fn message(id: &str, from: &str, to: &str, text: &str) -> Message {
    Message {
        id: id.to_string(),
        sender_id: from.to_string(),
        receiver_id: to.to_string(),
        text: Some(text.to_string()),
        image: None,
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
    }
}

/// Wire form of an inbound `newMessage` event
pub fn inbound(id: &str, from: &str) -> Value {
    serde_json::to_value(message(id, from, "me", "ping")).unwrap()
}

/// Wait until the store satisfies `predicate`, returning that state
pub async fn wait_for_state<F>(store: &ChatStore, predicate: F) -> ChatState
where
    F: Fn(&ChatState) -> bool,
{
    let mut rx = store.subscribe();
    timeout(Duration::from_secs(2), async {
        loop {
            {
                let state = rx.borrow_and_update();
                if predicate(&state) {
                    return state.clone();
                }
            }
            rx.changed().await.expect("store dropped");
        }
    })
    .await
    .expect("timed out waiting for store state")
}
