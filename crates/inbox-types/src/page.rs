//! Paginated list and summary payloads.

use serde::{Deserialize, Serialize};

use crate::Notification;

/// Cursor information for the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// One page of notifications, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub page_info: PageInfo,
}

/// Aggregate unread counter for the current user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSummary {
    pub unread_count: u32,
    /// True while an authoritative refresh is outstanding. Never sent over the wire.
    #[serde(skip)]
    pub frozen: bool,
}

impl NotificationSummary {
    pub fn new(unread_count: u32) -> Self {
        Self {
            unread_count,
            frozen: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_frozen_not_serialized() {
        let summary = NotificationSummary {
            unread_count: 4,
            frozen: true,
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert_eq!(json, r#"{"unread_count":4}"#);

        let back: NotificationSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.unread_count, 4);
        assert!(!back.frozen);
    }

    #[test]
    fn test_empty_page_defaults() {
        let page = NotificationPage::default();
        assert!(page.notifications.is_empty());
        assert!(!page.page_info.has_more);
        assert!(page.page_info.next_cursor.is_none());
    }
}
