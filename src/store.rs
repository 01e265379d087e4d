// Conversation state store
// Single source of truth for the contact directory, the active transcript,
// the selection and unread counts. Views observe it through `subscribe()`.

use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::{ApiError, ChatApi};
use crate::models::{Contact, Message, MessagePayload, UnreadCounts};
use crate::notify::Notifier;
use crate::socket::EventSource;

/// Socket event carrying a newly created message
pub const NEW_MESSAGE_EVENT: &str = "newMessage";

const USERS_FALLBACK: &str = "Failed to fetch users";
const MESSAGES_FALLBACK: &str = "Failed to fetch messages";
const SEND_FALLBACK: &str = "Failed to send message";
const NO_SELECTION: &str = "Select a contact before sending a message";

#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub users: Vec<Contact>,
    pub messages: Vec<Message>,
    pub selected_user: Option<Contact>,
    pub is_users_loading: bool,
    pub is_messages_loading: bool,
    pub unread_counts: UnreadCounts,
}

/// Where an inbound message ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Appended to the visible transcript
    Transcript,
    /// Counted as unread; carries the sender's new count
    Unread(u32),
}

impl ChatState {
    pub fn selected_id(&self) -> Option<&str> {
        self.selected_user.as_ref().map(|c| c.id.as_str())
    }

    /// Route an inbound message: the selected contact's messages join the
    /// transcript, everyone else's only bump their unread count.
    pub fn apply_incoming(&mut self, message: Message) -> Delivery {
        if self.selected_id() == Some(message.sender_id.as_str()) {
            self.messages.push(message);
            Delivery::Transcript
        } else {
            let count = self.unread_counts.increment(&message.sender_id);
            debug!("Unread count for {} is now {}", message.sender_id, count);
            Delivery::Unread(count)
        }
    }

    pub fn select(&mut self, contact: Contact) {
        self.unread_counts.reset(&contact.id);
        self.selected_user = Some(contact);
    }
}

fn users_loading(state: &mut ChatState) -> &mut bool {
    &mut state.is_users_loading
}

fn messages_loading(state: &mut ChatState) -> &mut bool {
    &mut state.is_messages_loading
}

/// Raises a loading flag and lowers it again when dropped, whatever happened in between
struct LoadingFlag<'a> {
    state: &'a watch::Sender<ChatState>,
    flag: fn(&mut ChatState) -> &mut bool,
}

impl<'a> LoadingFlag<'a> {
    fn raise(state: &'a watch::Sender<ChatState>, flag: fn(&mut ChatState) -> &mut bool) -> Self {
        state.send_modify(|s| *flag(s) = true);
        LoadingFlag { state, flag }
    }
}

impl Drop for LoadingFlag<'_> {
    fn drop(&mut self) {
        let flag = self.flag;
        self.state.send_modify(|s| *flag(s) = false);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    state: Arc<watch::Sender<ChatState>>,
    api: Arc<dyn ChatApi>,
    notifier: Notifier,
    transport: Mutex<Option<Arc<dyn EventSource>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Session-scoped conversation store. Clones share the same state.
#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<Inner>,
}

impl ChatStore {
    pub fn new(api: Arc<dyn ChatApi>, notifier: Notifier) -> Self {
        let (state, _rx) = watch::channel(ChatState::default());
        ChatStore {
            inner: Arc::new(Inner {
                state: Arc::new(state),
                api,
                notifier,
                transport: Mutex::new(None),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> ChatState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified after every state update
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.inner.state.subscribe()
    }

    pub fn selected_contact(&self) -> Option<Contact> {
        self.inner.state.borrow().selected_user.clone()
    }

    pub fn unread_count(&self, contact_id: &str) -> u32 {
        self.inner.state.borrow().unread_counts.get(contact_id)
    }

    /// Make a real-time transport available to `begin_listening`
    pub fn attach_transport(&self, transport: Arc<dyn EventSource>) {
        let previous = lock(&self.inner.transport).replace(transport);
        if let Some(previous) = previous {
            // The old listener drains what it already accepted, then ends
            previous.off(NEW_MESSAGE_EVENT);
            if lock(&self.inner.listener).take().is_some() {
                debug!("Transport replaced, {} listener released", NEW_MESSAGE_EVENT);
            }
        }
    }

    /// Stop listening and forget the transport
    pub fn detach_transport(&self) {
        self.stop_listening();
        *lock(&self.inner.transport) = None;
    }

    fn transport(&self) -> Option<Arc<dyn EventSource>> {
        lock(&self.inner.transport).clone()
    }

    fn report(&self, err: &ApiError, fallback: &str) {
        error!("{}: {}", fallback, err);
        self.inner.notifier.error(err.user_message().unwrap_or(fallback));
    }

    /// Fetch the contact directory. Failures keep the previous list.
    pub async fn load_contacts(&self) {
        let _loading = LoadingFlag::raise(&self.inner.state, users_loading);

        match self.inner.api.fetch_contacts().await {
            Ok(users) => {
                info!("Loaded {} contacts", users.len());
                self.inner.state.send_modify(|s| s.users = users);
            }
            Err(e) => self.report(&e, USERS_FALLBACK),
        }
    }

    /// Fetch the message history with `contact_id`, replacing the transcript
    pub async fn load_transcript(&self, contact_id: &str) {
        let _loading = LoadingFlag::raise(&self.inner.state, messages_loading);

        match self.inner.api.fetch_transcript(contact_id).await {
            Ok(messages) => {
                info!("Loaded {} messages with {}", messages.len(), contact_id);
                self.inner.state.send_modify(|s| s.messages = messages);
            }
            Err(e) => self.report(&e, MESSAGES_FALLBACK),
        }
    }

    /// Send `payload` to the selected contact and append the confirmed message.
    /// Without a selection nothing is sent and the user is told why.
    pub async fn send_message(&self, payload: MessagePayload) {
        let selected = self.inner.state.borrow().selected_id().map(str::to_string);
        let Some(contact_id) = selected else {
            warn!("send_message called with no contact selected");
            self.inner.notifier.error(NO_SELECTION);
            return;
        };

        match self.inner.api.send_message(&contact_id, &payload).await {
            Ok(message) => {
                debug!("Message {} confirmed by server", message.id);
                self.inner.state.send_modify(|s| s.messages.push(message));
            }
            Err(e) => self.report(&e, SEND_FALLBACK),
        }
    }

    /// Start routing `newMessage` events into the store. Requires a selection
    /// and an attached transport; otherwise does nothing. A live subscription
    /// is kept as is, since routing reads the selection per event.
    /// Must be called from within a tokio runtime.
    pub fn begin_listening(&self) {
        let has_selection = self.inner.state.borrow().selected_user.is_some();
        if !has_selection {
            debug!("No contact selected, not subscribing to {}", NEW_MESSAGE_EVENT);
            return;
        }

        let Some(transport) = self.transport() else {
            error!("Socket not available, cannot subscribe to {}", NEW_MESSAGE_EVENT);
            return;
        };

        let mut listener = lock(&self.inner.listener);
        if listener.as_ref().map_or(false, |handle| !handle.is_finished()) {
            debug!("Already listening for {}", NEW_MESSAGE_EVENT);
            return;
        }

        let mut events = transport.on(NEW_MESSAGE_EVENT);
        let state = self.inner.state.clone();
        let handle = tokio::spawn(async move {
            while let Some(payload) = events.recv().await {
                match serde_json::from_value::<Message>(payload) {
                    Ok(message) => {
                        let id = message.id.clone();
                        let mut delivery = Delivery::Transcript;
                        state.send_modify(|s| delivery = s.apply_incoming(message));
                        debug!("Inbound message {}: {:?}", id, delivery);
                    }
                    Err(e) => warn!("Dropping malformed {} payload: {}", NEW_MESSAGE_EVENT, e),
                }
            }
            debug!("{} listener finished", NEW_MESSAGE_EVENT);
        });

        // Any previous task has already finished
        *listener = Some(handle);
        info!("Listening for {}", NEW_MESSAGE_EVENT);
    }

    /// Remove the `newMessage` subscription. Safe to call when not listening.
    pub fn stop_listening(&self) {
        if let Some(transport) = self.transport() {
            transport.off(NEW_MESSAGE_EVENT);
        }
        if let Some(handle) = lock(&self.inner.listener).take() {
            handle.abort();
            info!("Stopped listening for {}", NEW_MESSAGE_EVENT);
        }
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.inner.listener)
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Scoped form of `begin_listening`: the subscription ends when the guard drops
    pub fn listen(&self) -> Subscription {
        self.begin_listening();
        Subscription { store: self.clone() }
    }

    /// Make `contact` the active conversation and clear its unread count.
    /// The transcript is left alone; loading it is up to the caller.
    pub fn select_contact(&self, contact: Contact) {
        debug!("Selecting contact {} ({})", contact.full_name, contact.id);
        self.inner.state.send_modify(|s| s.select(contact));
    }
}

/// Guard returned by [`ChatStore::listen`]
#[must_use = "dropping the subscription stops listening immediately"]
pub struct Subscription {
    store: ChatStore,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.store.stop_listening();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn contact(id: &str) -> Contact {
        Contact {
            id: id.to_string(),
            full_name: id.to_uppercase(),
            email: None,
            profile_pic: None,
        }
    }

    fn message_from(sender: &str) -> Message {
        Message {
            id: format!("m-{}", sender),
            sender_id: sender.to_string(),
            receiver_id: "me".to_string(),
            text: Some("hello".to_string()),
            image: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_incoming_from_selected_joins_transcript() {
        let mut state = ChatState::default();
        state.select(contact("a"));
        state.unread_counts.increment("b");

        assert_eq!(state.apply_incoming(message_from("a")), Delivery::Transcript);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.unread_counts.get("a"), 0);
        assert_eq!(state.unread_counts.get("b"), 1);
    }

    #[test]
    fn test_incoming_from_other_counts_unread() {
        let mut state = ChatState::default();
        state.select(contact("a"));

        assert_eq!(state.apply_incoming(message_from("b")), Delivery::Unread(1));
        assert_eq!(state.apply_incoming(message_from("b")), Delivery::Unread(2));
        assert_eq!(state.apply_incoming(message_from("c")), Delivery::Unread(1));
        assert!(state.messages.is_empty());
        assert_eq!(state.unread_counts.get("a"), 0);
    }

    #[test]
    fn test_incoming_without_selection_counts_unread() {
        let mut state = ChatState::default();
        assert_eq!(state.apply_incoming(message_from("a")), Delivery::Unread(1));
        assert!(state.messages.is_empty());
    }

    #[test]
    fn test_select_resets_unread() {
        let mut state = ChatState::default();
        state.unread_counts.increment("a");
        state.unread_counts.increment("a");
        state.select(contact("a"));
        assert_eq!(state.unread_counts.get("a"), 0);
        assert_eq!(state.selected_id(), Some("a"));
    }

    #[test]
    fn test_loading_flag_lowered_on_drop() {
        let (tx, _rx) = watch::channel(ChatState::default());
        {
            let _flag = LoadingFlag::raise(&tx, users_loading);
            assert!(tx.borrow().is_users_loading);
            assert!(!tx.borrow().is_messages_loading);
        }
        assert!(!tx.borrow().is_users_loading);
    }
}
