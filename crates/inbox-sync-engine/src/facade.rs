//! Public surface of the sync engine.

use crate::executor::MutationKind;
use crate::session::SyncSession;
use crate::{InboxSnapshot, NetworkMonitor, SyncError, SyncResult};
use inbox_config_and_utils::SyncConfig;
use inbox_data_api::NotificationsApi;
use inbox_realtime::{BackoffPolicy, ChannelRegistry, ManagerOptions, SubscriptionState};
use inbox_types::Notification;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Subscription settings for a [`ChannelRegistry`] built from the sync config.
pub fn realtime_options(config: &SyncConfig) -> ManagerOptions {
    ManagerOptions {
        subscribe_timeout: config.subscribe_timeout(),
        backoff: BackoffPolicy::new(config.backoff_base(), config.backoff_max()),
    }
}

/// A user's notification inbox, kept in sync with the server.
///
/// Reads are served from the last published [`InboxSnapshot`] and never
/// block on the network. Mutations are optimistic: the snapshot changes
/// immediately and is rolled back if the server call fails.
pub struct NotificationInbox {
    config: SyncConfig,
    api: Arc<dyn NotificationsApi>,
    registry: Arc<ChannelRegistry>,
    network: Arc<dyn NetworkMonitor>,
    snapshots: Arc<watch::Sender<InboxSnapshot>>,
    session: RwLock<Option<Arc<SyncSession>>>,
    /// Serializes login and logout.
    lifecycle: Mutex<()>,
}

impl NotificationInbox {
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn NotificationsApi>,
        registry: Arc<ChannelRegistry>,
        network: Arc<dyn NetworkMonitor>,
    ) -> Self {
        let (snapshots, _) = watch::channel(InboxSnapshot::default());
        Self {
            config,
            api,
            registry,
            network,
            snapshots: Arc::new(snapshots),
            session: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    /// Start a session for `user_id` and load the first page and the counter.
    ///
    /// Any previous session is closed first. The new session stays active
    /// even if the initial load fails; the error is returned and also
    /// published as [`NotificationInbox::error`].
    pub async fn login(&self, user_id: &str, access_token: &str) -> SyncResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.close_session().await;

        let session = SyncSession::start(
            user_id,
            access_token,
            self.config.clone(),
            self.api.clone(),
            self.network.clone(),
            &self.registry,
            self.snapshots.clone(),
        );
        *self.session.write() = Some(session.clone());

        match session.refresh().await {
            Ok(()) => {
                info!(user_id = %user_id, unread_count = self.unread_count(), "Inbox ready");
                Ok(())
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Initial inbox load failed");
                Err(e)
            }
        }
    }

    /// Close the session: release the channel, settle queued mutations, drop
    /// cached state.
    pub async fn logout(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.close_session().await;
    }

    async fn close_session(&self) {
        let session = self.session.write().take();
        if let Some(session) = session {
            session.shutdown().await;
            self.snapshots.send_replace(InboxSnapshot::default());
        }
    }

    fn session(&self) -> SyncResult<Arc<SyncSession>> {
        self.session
            .read()
            .clone()
            .ok_or(SyncError::NotAuthenticated)
    }

    pub fn user_id(&self) -> Option<String> {
        self.session
            .read()
            .as_ref()
            .map(|session| session.user_id().to_string())
    }

    // ---- reads ----

    pub fn snapshot(&self) -> InboxSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Observe every published change.
    pub fn subscribe(&self) -> watch::Receiver<InboxSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.snapshots.borrow().notifications.clone()
    }

    pub fn unread_count(&self) -> u32 {
        self.snapshots.borrow().unread_count
    }

    pub fn is_loading(&self) -> bool {
        self.snapshots.borrow().is_loading
    }

    pub fn is_ready(&self) -> bool {
        self.snapshots.borrow().is_ready
    }

    pub fn error(&self) -> Option<String> {
        self.snapshots.borrow().error.clone()
    }

    pub fn has_more(&self) -> bool {
        self.snapshots.borrow().has_more
    }

    pub fn stream_state(&self) -> SubscriptionState {
        self.snapshots.borrow().stream_state
    }

    // ---- mutations ----

    pub async fn mark_as_read(&self, id: &str) -> SyncResult<()> {
        self.session()?
            .mutate(MutationKind::MarkRead(id.to_string()))
            .await
    }

    pub async fn mark_all_as_read(&self) -> SyncResult<()> {
        self.session()?.mutate(MutationKind::MarkAllRead).await
    }

    pub async fn delete_notification(&self, id: &str) -> SyncResult<()> {
        self.session()?
            .mutate(MutationKind::Delete(id.to_string()))
            .await
    }

    // ---- fetches ----

    /// Refetch the first page and the counter. No-op while offline.
    pub async fn refresh_notifications(&self) -> SyncResult<()> {
        let session = self.session()?;
        if !session.network().is_online() {
            debug!("Offline, skipping refresh");
            return Ok(());
        }
        session.refresh().await
    }

    /// Load the next page. Returns how many rows were added.
    pub async fn load_more(&self) -> SyncResult<usize> {
        self.session()?.load_more().await
    }
}

impl std::fmt::Debug for NotificationInbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationInbox")
            .field("user_id", &self.user_id())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
