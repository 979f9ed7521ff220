//! Shared domain types for the notification inbox.
//!
//! This crate provides:
//! - `Notification` and `NotificationType`: rows of the `notifications` table
//! - `NotificationPage` / `PageInfo`: paginated list responses
//! - `NotificationSummary`: the aggregate unread counter
//! - `ChangeEvent`: realtime change-feed payloads, plus record validation

mod change_event;
mod notification;
mod page;

pub use change_event::{ChangeEvent, ChangeEventType, PayloadError};
pub use notification::{Notification, NotificationType};
pub use page::{NotificationPage, NotificationSummary, PageInfo};
