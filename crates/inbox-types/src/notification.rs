//! Notification data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Like,
    Comment,
    Reply,
    Mention,
    Follow,
    Booking,
    Message,
    Poll,
    Moderation,
    System,
}

/// A user notification as stored in the `notifications` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    /// Set once when the notification is first read.
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Number of coalesced events folded into this row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_count: Option<u32>,
}

impl Notification {
    /// Whether this notification still counts toward the unread badge.
    pub fn is_unread(&self) -> bool {
        !self.is_read
    }

    /// Number of underlying events this row represents (at least 1).
    pub fn effective_batch_count(&self) -> u32 {
        self.batch_count.unwrap_or(1).max(1)
    }
}
