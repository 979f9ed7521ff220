//! Data API collaborator for the notification inbox.
//!
//! ```text
//! Sync engine → NotificationsApi → SupabaseNotificationsApi → PostgREST
//! ```
//!
//! The engine only ever talks to the [`NotificationsApi`] trait; the Supabase
//! client is the production implementation.

mod client;
mod error;

pub use client::{AuthContext, SupabaseNotificationsApi, NOTIFICATIONS_TABLE};
pub use error::{ApiError, ApiResult};

use async_trait::async_trait;
use inbox_types::{NotificationPage, NotificationSummary};

/// Server operations the sync engine consumes.
#[async_trait]
pub trait NotificationsApi: Send + Sync {
    /// Fetch one page, newest first. `cursor` is the `next_cursor` of the previous page.
    async fn fetch_notifications(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> ApiResult<NotificationPage>;

    /// Fetch the authoritative unread counter.
    async fn fetch_notification_summary(&self) -> ApiResult<NotificationSummary>;

    async fn mark_notification_as_read(&self, id: &str) -> ApiResult<()>;

    async fn mark_all_notifications_as_read(&self) -> ApiResult<()>;

    async fn delete_notification_by_id(&self, id: &str) -> ApiResult<()>;
}
