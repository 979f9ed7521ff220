//! Observable inbox state.

use inbox_realtime::SubscriptionState;
use inbox_types::Notification;

/// Everything a UI needs to render the inbox, published on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxSnapshot {
    /// Cached rows, newest first, across all loaded pages.
    pub notifications: Vec<Notification>,
    /// Unread counter; 0 until the first summary arrives.
    pub unread_count: u32,
    pub has_more: bool,
    /// A list or summary fetch is in flight.
    pub is_loading: bool,
    /// The initial load completed successfully.
    pub is_ready: bool,
    /// Last fetch error, cleared by the next successful fetch.
    pub error: Option<String>,
    pub stream_state: SubscriptionState,
    /// Bumped by every cache write.
    pub revision: u64,
}

impl Default for InboxSnapshot {
    fn default() -> Self {
        Self {
            notifications: Vec::new(),
            unread_count: 0,
            has_more: false,
            is_loading: false,
            is_ready: false,
            error: None,
            stream_state: SubscriptionState::Unsubscribed,
            revision: 0,
        }
    }
}
