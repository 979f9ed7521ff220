//! Test harness: in-memory data API, scriptable realtime transport, and an
//! inbox wired to both.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, TimeZone, Utc};
use inbox_config_and_utils::SyncConfig;
use inbox_data_api::{ApiError, ApiResult, NotificationsApi};
use inbox_realtime::{
    ChannelParams, ChannelRegistry, ChannelSubscription, RealtimeError, RealtimeResult,
    RealtimeTransport, SubscriptionState,
};
use inbox_sync_engine::{realtime_options, InboxSnapshot, NotificationInbox, ToggleNetwork};
use inbox_types::{
    ChangeEvent, ChangeEventType, Notification, NotificationPage, NotificationSummary,
    NotificationType, PageInfo,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

pub const USER_ID: &str = "user-1";
pub const TOKEN: &str = "test-token";

// =============================================================================
// Fixtures
// =============================================================================

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Notification created `minute` minutes after the base time.
pub fn notification(id: &str, minute: i64, is_read: bool) -> Notification {
    Notification {
        id: id.to_string(),
        user_id: USER_ID.to_string(),
        notification_type: NotificationType::Reply,
        title: format!("Reply {}", id),
        message: "Someone replied to your comment".to_string(),
        link: Some(format!("/posts/{}", id)),
        is_read,
        read_at: is_read.then(base_time),
        created_at: base_time() + ChronoDuration::minutes(minute),
        batch_count: None,
    }
}

/// `count` unread rows, ids `n-0`.., newest last.
pub fn unread_rows(count: usize) -> Vec<Notification> {
    (0..count)
        .map(|i| notification(&format!("n-{}", i), i as i64, false))
        .collect()
}

pub fn insert_event(notification: &Notification, commit_timestamp: &str) -> ChangeEvent {
    ChangeEvent {
        event_type: ChangeEventType::Insert,
        new: Some(serde_json::to_value(notification).unwrap()),
        old: Some(json!({})),
        commit_timestamp: commit_timestamp.to_string(),
    }
}

pub fn update_event(notification: &Notification, commit_timestamp: &str) -> ChangeEvent {
    ChangeEvent {
        event_type: ChangeEventType::Update,
        new: Some(serde_json::to_value(notification).unwrap()),
        old: Some(json!({ "id": notification.id })),
        commit_timestamp: commit_timestamp.to_string(),
    }
}

pub fn delete_event(id: &str, commit_timestamp: &str) -> ChangeEvent {
    ChangeEvent {
        event_type: ChangeEventType::Delete,
        new: Some(json!({})),
        old: Some(json!({ "id": id })),
        commit_timestamp: commit_timestamp.to_string(),
    }
}

/// Delete carrying the full old image, as sent under `REPLICA IDENTITY FULL`.
pub fn full_delete_event(id: &str, was_read: bool, commit_timestamp: &str) -> ChangeEvent {
    ChangeEvent {
        event_type: ChangeEventType::Delete,
        new: Some(json!({})),
        old: Some(json!({ "id": id, "user_id": USER_ID, "is_read": was_read })),
        commit_timestamp: commit_timestamp.to_string(),
    }
}

// =============================================================================
// Data API
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOp {
    FetchPage,
    FetchSummary,
    MarkRead,
    MarkAllRead,
    Delete,
}

/// Holds one call of an operation until opened.
#[derive(Clone)]
pub struct Gate {
    open: Arc<Semaphore>,
    entered: Arc<Semaphore>,
}

impl Gate {
    fn new() -> Self {
        Self {
            open: Arc::new(Semaphore::new(0)),
            entered: Arc::new(Semaphore::new(0)),
        }
    }

    /// Wait until the held call has started.
    pub async fn entered(&self) {
        self.entered.acquire().await.unwrap().forget();
    }

    pub fn open(&self) {
        self.open.add_permits(1);
    }
}

/// In-memory `notifications` table for one user.
#[derive(Default)]
pub struct MockNotificationsApi {
    rows: Mutex<Vec<Notification>>,
    failures: Mutex<HashMap<ApiOp, usize>>,
    gates: Mutex<HashMap<ApiOp, Gate>>,
    calls: Mutex<Vec<ApiOp>>,
}

impl MockNotificationsApi {
    pub fn with_rows(rows: Vec<Notification>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(rows),
            ..Default::default()
        })
    }

    /// Add a row server-side without emitting a change event.
    pub fn insert_row(&self, notification: Notification) {
        self.rows.lock().push(notification);
    }

    pub fn set_read(&self, id: &str) {
        if let Some(row) = self.rows.lock().iter_mut().find(|n| n.id == id) {
            row.is_read = true;
            row.read_at = Some(Utc::now());
        }
    }

    pub fn remove_row(&self, id: &str) {
        self.rows.lock().retain(|n| n.id != id);
    }

    /// Fail the next call of `op`.
    pub fn fail_next(&self, op: ApiOp) {
        *self.failures.lock().entry(op).or_default() += 1;
    }

    /// Hold the next call of `op` until the gate is opened.
    pub fn hold(&self, op: ApiOp) -> Gate {
        let gate = Gate::new();
        self.gates.lock().insert(op, gate.clone());
        gate
    }

    pub fn calls(&self, op: ApiOp) -> usize {
        self.calls.lock().iter().filter(|c| **c == op).count()
    }

    async fn enter(&self, op: ApiOp) -> ApiResult<()> {
        self.calls.lock().push(op);

        let gate = self.gates.lock().remove(&op);
        if let Some(gate) = gate {
            gate.entered.add_permits(1);
            gate.open.acquire().await.unwrap().forget();
        }

        let mut failures = self.failures.lock();
        match failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ApiError::Supabase {
                    status: 503,
                    message: format!("{:?} unavailable", op),
                })
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl NotificationsApi for MockNotificationsApi {
    async fn fetch_notifications(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> ApiResult<NotificationPage> {
        self.enter(ApiOp::FetchPage).await?;

        let cursor = cursor
            .map(|c| DateTime::parse_from_rfc3339(c).map(|t| t.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

        let mut rows: Vec<Notification> = self
            .rows
            .lock()
            .iter()
            .filter(|n| cursor.map_or(true, |c| n.created_at < c))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let limit = limit as usize;
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last()
                .map(|n| n.created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        } else {
            None
        };

        Ok(NotificationPage {
            notifications: rows,
            page_info: PageInfo {
                has_more,
                next_cursor,
            },
        })
    }

    async fn fetch_notification_summary(&self) -> ApiResult<NotificationSummary> {
        self.enter(ApiOp::FetchSummary).await?;
        let unread = self.rows.lock().iter().filter(|n| !n.is_read).count();
        Ok(NotificationSummary::new(unread as u32))
    }

    async fn mark_notification_as_read(&self, id: &str) -> ApiResult<()> {
        self.enter(ApiOp::MarkRead).await?;
        if let Some(row) = self.rows.lock().iter_mut().find(|n| n.id == id && !n.is_read) {
            row.is_read = true;
            row.read_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_all_notifications_as_read(&self) -> ApiResult<()> {
        self.enter(ApiOp::MarkAllRead).await?;
        for row in self.rows.lock().iter_mut().filter(|n| !n.is_read) {
            row.is_read = true;
            row.read_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn delete_notification_by_id(&self, id: &str) -> ApiResult<()> {
        self.enter(ApiOp::Delete).await?;
        self.remove_row(id);
        Ok(())
    }
}

// =============================================================================
// Realtime transport
// =============================================================================

/// Accepts every subscribe unless told to fail; events are pushed by the test.
#[derive(Default)]
pub struct MockTransport {
    failures: AtomicUsize,
    subscribes: AtomicUsize,
    open: Mutex<Option<mpsc::Sender<RealtimeResult<ChangeEvent>>>>,
}

impl MockTransport {
    pub fn fail_next_subscribes(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub async fn emit(&self, event: ChangeEvent) {
        let sender = self.open.lock().clone().expect("no open channel");
        sender.send(Ok(event)).await.expect("channel closed");
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self) {
        self.open.lock().take();
    }

    pub fn is_open(&self) -> bool {
        self.open.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl RealtimeTransport for MockTransport {
    async fn subscribe(&self, _params: &ChannelParams) -> RealtimeResult<ChannelSubscription> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(RealtimeError::JoinRejected("scripted failure".to_string()));
        }

        let (tx, subscription) = ChannelSubscription::channel();
        *self.open.lock() = Some(tx);
        Ok(subscription)
    }
}

// =============================================================================
// Harness
// =============================================================================

pub fn test_config() -> SyncConfig {
    SyncConfig {
        backoff_base_ms: 10,
        backoff_max_ms: 50,
        ..SyncConfig::default()
    }
}

pub struct Harness {
    pub api: Arc<MockNotificationsApi>,
    pub transport: Arc<MockTransport>,
    pub registry: Arc<ChannelRegistry>,
    pub network: Arc<ToggleNetwork>,
    pub inbox: NotificationInbox,
}

impl Harness {
    pub fn new(rows: Vec<Notification>) -> Self {
        Self::with_transport(rows, Arc::new(MockTransport::default()))
    }

    pub fn with_transport(rows: Vec<Notification>, transport: Arc<MockTransport>) -> Self {
        let config = test_config();
        let api = MockNotificationsApi::with_rows(rows);
        let registry = Arc::new(ChannelRegistry::new(
            transport.clone(),
            realtime_options(&config),
        ));
        let network = Arc::new(ToggleNetwork::default());
        let inbox = NotificationInbox::new(config, api.clone(), registry.clone(), network.clone());

        Self {
            api,
            transport,
            registry,
            network,
            inbox,
        }
    }

    /// Log in and wait for the change stream to be live.
    pub async fn login(&self) {
        self.inbox.login(USER_ID, TOKEN).await.unwrap();
        self.wait_for("stream subscribed", |s| {
            s.stream_state == SubscriptionState::Subscribed
        })
        .await;
    }

    pub async fn wait_for(
        &self,
        what: &str,
        predicate: impl Fn(&InboxSnapshot) -> bool,
    ) -> InboxSnapshot {
        let mut rx = self.inbox.subscribe();
        let result = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s))).await;
        match result {
            Ok(Ok(snapshot)) => snapshot.clone(),
            Ok(Err(_)) => panic!("snapshot channel closed waiting for {}", what),
            Err(_) => panic!("timed out waiting for {}", what),
        }
    }

    pub fn is_read(&self, id: &str) -> bool {
        self.inbox
            .notifications()
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.is_read)
            .unwrap_or_else(|| panic!("{} not cached", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inbox.notifications().iter().any(|n| n.id == id)
    }
}
