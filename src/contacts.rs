// Contact list view model
// Filters and orders the directory for display and owns the "online only" toggle.

use log::{debug, info};
use std::cmp::Ordering;

use crate::models::{Contact, OnlineSet, UnreadCounts};
use crate::store::{ChatState, ChatStore};

/// One rendered line of the contact list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRow<'a> {
    pub contact: &'a Contact,
    pub avatar: &'a str,
    pub online: bool,
    /// `None` when there is nothing unread
    pub unread: Option<u32>,
    pub selected: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ContactListView {
    show_online_only: bool,
}

impl ContactListView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show_online_only(&self) -> bool {
        self.show_online_only
    }

    pub fn set_show_online_only(&mut self, enabled: bool) {
        self.show_online_only = enabled;
    }

    /// Flip the filter and return its new value
    pub fn toggle_online_only(&mut self) -> bool {
        self.show_online_only = !self.show_online_only;
        debug!("Show online only: {}", self.show_online_only);
        self.show_online_only
    }

    /// Contacts to show, most unread first, then by name
    pub fn visible<'a>(&self, contacts: &'a [Contact], online: &OnlineSet, unread: &UnreadCounts) -> Vec<&'a Contact> {
        let mut visible: Vec<&Contact> = contacts
            .iter()
            .filter(|c| !self.show_online_only || online.contains(&c.id))
            .collect();

        // sort_by is stable, equal keys keep directory order
        visible.sort_by(|a, b| {
            unread
                .get(&b.id)
                .cmp(&unread.get(&a.id))
                .then_with(|| compare_names(&a.full_name, &b.full_name))
        });
        visible
    }

    pub fn rows<'a>(&self, state: &'a ChatState, online: &OnlineSet) -> Vec<ContactRow<'a>> {
        let selected = state.selected_id();
        self.visible(&state.users, online, &state.unread_counts)
            .into_iter()
            .map(|contact| {
                let unread = state.unread_counts.get(&contact.id);
                ContactRow {
                    contact,
                    avatar: contact.avatar(),
                    online: online.contains(&contact.id),
                    unread: (unread > 0).then_some(unread),
                    selected: selected == Some(contact.id.as_str()),
                }
            })
            .collect()
    }

    /// Number of online users other than ourselves
    pub fn online_count(online: &OnlineSet, own_id: Option<&str>) -> usize {
        match own_id {
            Some(id) if online.contains(id) => online.len() - 1,
            _ => online.len(),
        }
    }

    /// Select `contact` in the store. Loading its transcript is left to the caller.
    pub fn select(&self, store: &ChatStore, contact: &Contact) {
        store.select_contact(contact.clone());
    }

    /// Start the view: load the directory in the background and begin
    /// listening for messages. Unmounting (or dropping) the handle stops listening.
    pub fn mount(store: &ChatStore) -> MountedContactList {
        info!("Mounting contact list");
        let loader = store.clone();
        tokio::spawn(async move { loader.load_contacts().await });
        store.begin_listening();
        MountedContactList { store: store.clone() }
    }
}

/// Lifetime of a mounted contact list
pub struct MountedContactList {
    store: ChatStore,
}

impl MountedContactList {
    pub fn unmount(self) {
        // Drop does the work
    }
}

impl Drop for MountedContactList {
    fn drop(&mut self) {
        info!("Unmounting contact list");
        self.store.stop_listening();
    }
}

fn fold_accent(c: char) -> char {
    match c {
        'à'..='å' => 'a',
        'ç' => 'c',
        'è'..='ë' => 'e',
        'ì'..='ï' => 'i',
        'ñ' => 'n',
        'ò'..='ö' | 'ø' => 'o',
        'ù'..='ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'ā' | 'ă' | 'ą' => 'a',
        'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
        'ď' | 'đ' => 'd',
        'ē'..='ě' => 'e',
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => 'g',
        'ī' | 'ĭ' | 'į' | 'ı' => 'i',
        'ķ' => 'k',
        'ĺ' | 'ļ' | 'ľ' | 'ł' => 'l',
        'ń' | 'ņ' | 'ň' => 'n',
        'ō' | 'ŏ' | 'ő' => 'o',
        'ŕ' | 'ř' => 'r',
        'ś' | 'ŝ' | 'ş' | 'š' => 's',
        'ţ' | 'ť' => 't',
        'ū'..='ų' => 'u',
        'ź' | 'ż' | 'ž' => 'z',
        _ => c,
    }
}

/// Locale-style name ordering: letters first compared without case or
/// accents, then accents, then case with lowercase first.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let lower = |s: &str| s.chars().flat_map(char::to_lowercase).collect::<Vec<char>>();
    let (la, lb) = (lower(a), lower(b));

    let primary = la.iter().map(|&c| fold_accent(c)).cmp(lb.iter().map(|&c| fold_accent(c)));
    primary.then_with(|| la.cmp(&lb)).then_with(|| {
        for (x, y) in a.chars().zip(b.chars()) {
            if x != y {
                return match (x.is_lowercase(), y.is_lowercase()) {
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    _ => x.cmp(&y),
                };
            }
        }
        a.len().cmp(&b.len())
    })
}
