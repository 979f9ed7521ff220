//! Supabase PostgREST client for the `notifications` table.

use crate::error::{ApiError, ApiResult};
use crate::NotificationsApi;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use inbox_types::{Notification, NotificationPage, NotificationSummary, PageInfo};
use reqwest::RequestBuilder;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Table holding per-user notifications.
pub const NOTIFICATIONS_TABLE: &str = "notifications";

/// Credentials for the signed-in user.
#[derive(Clone)]
pub struct AuthContext {
    /// Supabase access token (JWT).
    pub access_token: String,
    /// Owner of the inbox; every query is filtered on it.
    pub user_id: String,
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// Supabase REST API client for notifications.
pub struct SupabaseNotificationsApi {
    http_client: reqwest::Client,
    api_url: String,
    anon_key: String,
    context: RwLock<Option<AuthContext>>,
}

impl SupabaseNotificationsApi {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_url` - The Supabase project API URL (e.g., `https://xyz.supabase.co`)
    /// * `anon_key` - The Supabase publishable API key
    /// * `timeout` - Per-request timeout; an expired request counts as a failure
    pub fn new(
        api_url: impl Into<String>,
        anon_key: impl Into<String>,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        let api_url = api_url.into().trim_end_matches('/').to_string();
        if api_url.is_empty() {
            return Err(ApiError::Config("empty Supabase URL".to_string()));
        }

        Ok(Self {
            http_client,
            api_url,
            anon_key: anon_key.into(),
            context: RwLock::new(None),
        })
    }

    /// Set the auth context (call after sign-in or token refresh).
    pub async fn set_context(&self, context: AuthContext) {
        debug!(user_id = %context.user_id, "Notifications API context set");
        *self.context.write().await = Some(context);
    }

    /// Clear the auth context (call on logout).
    pub async fn clear_context(&self) {
        *self.context.write().await = None;
        debug!("Notifications API context cleared");
    }

    async fn context(&self) -> ApiResult<AuthContext> {
        self.context
            .read()
            .await
            .clone()
            .ok_or(ApiError::NotAuthenticated)
    }

    /// Build the REST API URL for the notifications table.
    fn rest_url(&self) -> String {
        format!("{}/rest/v1/{}", self.api_url, NOTIFICATIONS_TABLE)
    }

    fn authorized(&self, builder: RequestBuilder, context: &AuthContext) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", context.access_token))
    }

    /// PATCH the rows matching `filters` to read.
    async fn mark_read_where(
        &self,
        context: &AuthContext,
        filters: &[(&str, String)],
    ) -> ApiResult<()> {
        let body = serde_json::json!({
            "is_read": true,
            "read_at": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        });

        let response = self
            .authorized(self.http_client.patch(self.rest_url()), context)
            .query(filters)
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;

        check_response(response).await.map(|_| ())
    }
}

#[async_trait]
impl NotificationsApi for SupabaseNotificationsApi {
    async fn fetch_notifications(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> ApiResult<NotificationPage> {
        let context = self.context().await?;

        // One extra row tells us whether another page exists.
        let mut query = vec![
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", context.user_id)),
            ("order", "created_at.desc,id.desc".to_string()),
            ("limit", (limit + 1).to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("created_at", format!("lt.{}", cursor)));
        }

        debug!(?cursor, limit, "Fetching notifications page");

        let response = self
            .authorized(self.http_client.get(self.rest_url()), &context)
            .query(&query)
            .send()
            .await?;
        let rows: Vec<Notification> = check_response(response).await?.json().await?;

        let page = build_page(rows, limit);
        debug!(
            count = page.notifications.len(),
            has_more = page.page_info.has_more,
            "Fetched notifications page"
        );
        Ok(page)
    }

    async fn fetch_notification_summary(&self) -> ApiResult<NotificationSummary> {
        let context = self.context().await?;

        let query = [
            ("select", "id".to_string()),
            ("user_id", format!("eq.{}", context.user_id)),
            ("is_read", "eq.false".to_string()),
        ];

        let response = self
            .authorized(self.http_client.head(self.rest_url()), &context)
            .query(&query)
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let response = check_response(response).await?;

        let content_range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::InvalidResponse("missing Content-Range header".to_string()))?;

        let unread_count = parse_content_range(content_range).ok_or_else(|| {
            ApiError::InvalidResponse(format!("unparseable Content-Range: {}", content_range))
        })?;

        debug!(unread_count, "Fetched notification summary");
        Ok(NotificationSummary::new(unread_count))
    }

    async fn mark_notification_as_read(&self, id: &str) -> ApiResult<()> {
        let context = self.context().await?;
        debug!(notification_id = id, "Marking notification read");

        // `is_read=eq.false` keeps read_at from being overwritten.
        self.mark_read_where(
            &context,
            &[
                ("id", format!("eq.{}", id)),
                ("user_id", format!("eq.{}", context.user_id)),
                ("is_read", "eq.false".to_string()),
            ],
        )
        .await
    }

    async fn mark_all_notifications_as_read(&self) -> ApiResult<()> {
        let context = self.context().await?;
        debug!("Marking all notifications read");

        self.mark_read_where(
            &context,
            &[
                ("user_id", format!("eq.{}", context.user_id)),
                ("is_read", "eq.false".to_string()),
            ],
        )
        .await
    }

    async fn delete_notification_by_id(&self, id: &str) -> ApiResult<()> {
        let context = self.context().await?;
        debug!(notification_id = id, "Deleting notification");

        let response = self
            .authorized(self.http_client.delete(self.rest_url()), &context)
            .query(&[
                ("id", format!("eq.{}", id)),
                ("user_id", format!("eq.{}", context.user_id)),
            ])
            .header("Prefer", "return=minimal")
            .send()
            .await?;

        check_response(response).await.map(|_| ())
    }
}

impl std::fmt::Debug for SupabaseNotificationsApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseNotificationsApi")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

/// Check HTTP response for errors.
async fn check_response(response: reqwest::Response) -> ApiResult<reqwest::Response> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        error!("Supabase request failed: {} - {}", status, body);
        return Err(ApiError::Supabase {
            status,
            message: body,
        });
    }
    Ok(response)
}

/// Trim an over-fetched row set to `limit` and derive the next cursor.
fn build_page(mut rows: Vec<Notification>, limit: u32) -> NotificationPage {
    let limit = limit as usize;
    let has_more = rows.len() > limit;
    rows.truncate(limit);

    let next_cursor = if has_more {
        rows.last()
            .map(|n| n.created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
    } else {
        None
    };

    NotificationPage {
        notifications: rows,
        page_info: PageInfo {
            has_more,
            next_cursor,
        },
    }
}

/// Total from a PostgREST `Content-Range` header (`0-9/42` or `*/0`).
fn parse_content_range(value: &str) -> Option<u32> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use inbox_types::NotificationType;

    fn row(id: &str, minute: u32) -> Notification {
        Notification {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            notification_type: NotificationType::Like,
            title: "Like".to_string(),
            message: "Someone liked your post".to_string(),
            link: None,
            is_read: false,
            read_at: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap(),
            batch_count: None,
        }
    }

    fn client() -> SupabaseNotificationsApi {
        SupabaseNotificationsApi::new("https://test.supabase.co/", "test-key", Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn test_rest_url_trims_trailing_slash() {
        assert_eq!(
            client().rest_url(),
            "https://test.supabase.co/rest/v1/notifications"
        );
    }

    #[test]
    fn test_empty_url_rejected() {
        let result = SupabaseNotificationsApi::new("", "key", Duration::from_secs(1));
        assert!(matches!(result, Err(ApiError::Config(_))));
    }

    #[test]
    fn test_build_page_with_more() {
        let rows = vec![row("a", 3), row("b", 2), row("c", 1)];
        let page = build_page(rows, 2);

        assert_eq!(page.notifications.len(), 2);
        assert!(page.page_info.has_more);
        assert_eq!(
            page.page_info.next_cursor.as_deref(),
            Some("2024-05-01T10:02:00.000000Z")
        );
    }

    #[test]
    fn test_build_page_last_page() {
        let page = build_page(vec![row("a", 3)], 2);

        assert_eq!(page.notifications.len(), 1);
        assert!(!page.page_info.has_more);
        assert!(page.page_info.next_cursor.is_none());
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range("0-9/42"), Some(42));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-9/*"), None);
        assert_eq!(parse_content_range("garbage"), None);
    }

    #[tokio::test]
    async fn test_calls_without_context_fail_fast() {
        let api = client();

        let result = api.fetch_notification_summary().await;
        assert!(matches!(result, Err(ApiError::NotAuthenticated)));

        let result = api.mark_notification_as_read("n-1").await;
        assert!(matches!(result, Err(ApiError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_context_lifecycle() {
        let api = client();
        api.set_context(AuthContext {
            access_token: "secret-token".to_string(),
            user_id: "user-1".to_string(),
        })
        .await;
        assert_eq!(api.context().await.unwrap().user_id, "user-1");

        api.clear_context().await;
        assert!(matches!(api.context().await, Err(ApiError::NotAuthenticated)));
    }

    #[test]
    fn test_auth_context_debug_hides_token() {
        let context = AuthContext {
            access_token: "secret-token".to_string(),
            user_id: "user-1".to_string(),
        };
        let rendered = format!("{:?}", context);
        assert!(rendered.contains("user-1"));
        assert!(!rendered.contains("secret-token"));
    }
}
