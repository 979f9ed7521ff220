//! Per-login sync session.
//!
//! Owns everything that must not outlive the signed-in user: the cache, the
//! dedup store, the mutation worker and the channel lease. Created by
//! `login`, torn down by `logout`.

use crate::event_processor::EventProcessor;
use crate::executor::{MutationExecutor, MutationKind};
use crate::freeze::FreezeController;
use crate::mutation_queue::MutationQueue;
use crate::{DedupStore, InboxCache, InboxSnapshot, NetworkMonitor, SyncError, SyncResult};
use inbox_config_and_utils::SyncConfig;
use inbox_data_api::NotificationsApi;
use inbox_realtime::{ChannelLease, ChannelMessage, ChannelParams, ChannelRegistry, SubscriptionState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct StreamTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub(crate) struct SyncSession {
    user_id: String,
    config: SyncConfig,
    api: Arc<dyn NotificationsApi>,
    network: Arc<dyn NetworkMonitor>,
    cache: Arc<InboxCache>,
    dedup: Arc<Mutex<DedupStore>>,
    freeze: FreezeController,
    queue: MutationQueue,
    /// Bumped by every first-page fetch; older results are discarded.
    list_generation: AtomicU64,
    in_flight: AtomicUsize,
    closed: AtomicBool,
    snapshots: Arc<watch::Sender<InboxSnapshot>>,
    stream: Mutex<Option<StreamTask>>,
}

impl SyncSession {
    /// Build the session and start the mutation worker and change stream.
    pub fn start(
        user_id: &str,
        access_token: &str,
        config: SyncConfig,
        api: Arc<dyn NotificationsApi>,
        network: Arc<dyn NetworkMonitor>,
        registry: &ChannelRegistry,
        snapshots: Arc<watch::Sender<InboxSnapshot>>,
    ) -> Arc<Self> {
        let cache = Arc::new(InboxCache::new(snapshots.clone()));
        let dedup = Arc::new(Mutex::new(DedupStore::new(
            config.dedup_capacity,
            config.dedup_retention(),
        )));
        let freeze = FreezeController::new(cache.clone(), config.freeze_grace());
        let queue = MutationQueue::start(MutationExecutor::new(api.clone(), cache.clone()));
        let processor = EventProcessor::new(user_id, cache.clone(), dedup.clone());

        let session = Arc::new(Self {
            user_id: user_id.to_string(),
            config,
            api,
            network,
            cache,
            dedup,
            freeze,
            queue,
            list_generation: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            snapshots,
            stream: Mutex::new(None),
        });

        let lease = registry.acquire(ChannelParams::for_user(user_id, access_token));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_stream(
            Arc::downgrade(&session),
            lease,
            processor,
            shutdown_rx,
        ));
        *session.stream.lock() = Some(StreamTask {
            shutdown: shutdown_tx,
            handle,
        });

        info!(user_id = %user_id, "Sync session started");
        session
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn network(&self) -> &dyn NetworkMonitor {
        self.network.as_ref()
    }

    pub async fn mutate(&self, kind: MutationKind) -> SyncResult<()> {
        self.queue.enqueue(kind).await
    }

    /// Refetch the first page and the summary together.
    ///
    /// The counter is frozen for the duration and lifted after the grace
    /// period. A newer refresh supersedes this one's results.
    pub async fn refresh(&self) -> SyncResult<()> {
        let previous_count = self.cache.unread_count();
        let generation = self.list_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = self.freeze.freeze();
        debug!(?previous_count, generation, token, "Refreshing inbox");

        let _loading = self.begin_fetch();
        let (page, summary) = tokio::join!(
            self.api.fetch_notifications(None, self.config.page_size),
            self.api.fetch_notification_summary(),
        );

        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut failure = None;
        match page {
            Ok(page) => {
                let applied = self.cache.update(|state| {
                    if self.list_generation.load(Ordering::SeqCst) != generation {
                        return false;
                    }
                    state.set_first_page(page);
                    true
                });
                if !applied {
                    debug!(generation, "Discarding superseded page");
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch notifications");
                failure = Some(e);
            }
        }

        match summary {
            Ok(summary) => {
                if !self.freeze.settle_success(token, summary.unread_count) {
                    debug!(token, "Discarding superseded summary");
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch notification summary");
                self.freeze.settle_failure(token);
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }

        match failure {
            None => {
                self.publish_status(|snapshot| {
                    snapshot.error = None;
                    snapshot.is_ready = true;
                });
                Ok(())
            }
            Some(e) => {
                let message = e.to_string();
                self.publish_status(|snapshot| snapshot.error = Some(message));
                Err(SyncError::Api(e))
            }
        }
    }

    /// Fetch the page after the last cached one. Returns the number of new rows.
    pub async fn load_more(&self) -> SyncResult<usize> {
        let cursor = self.cache.read(|state| {
            state
                .page_info()
                .filter(|info| info.has_more)
                .and_then(|info| info.next_cursor.clone())
        });
        let Some(cursor) = cursor else {
            return Ok(0);
        };
        let generation = self.list_generation.load(Ordering::SeqCst);

        let _loading = self.begin_fetch();
        let page = match self
            .api
            .fetch_notifications(Some(&cursor), self.config.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(cursor = %cursor, error = %e, "Failed to fetch next page");
                let message = e.to_string();
                self.publish_status(|snapshot| snapshot.error = Some(message));
                return Err(e.into());
            }
        };

        let added = self.cache.update(|state| {
            let same_list = self.list_generation.load(Ordering::SeqCst) == generation;
            let same_cursor = state
                .page_info()
                .and_then(|info| info.next_cursor.as_deref())
                == Some(cursor.as_str());
            if same_list && same_cursor {
                Some(state.append_page(page))
            } else {
                None
            }
        });

        match added {
            Some(added) => {
                debug!(cursor = %cursor, added, "Appended page");
                Ok(added)
            }
            None => {
                debug!(cursor = %cursor, "Discarding superseded page");
                Ok(0)
            }
        }
    }

    /// Stop the stream, let queued intents settle, then drop all session state.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let stream = self.stream.lock().take();
        if let Some(stream) = stream {
            let _ = stream.shutdown.send(true);
            let _ = stream.handle.await;
        }

        self.queue.shutdown().await;
        self.cache.detach();
        self.cache.clear();
        self.dedup.lock().clear();

        info!(user_id = %self.user_id, "Sync session closed");
    }

    fn begin_fetch(&self) -> LoadingGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.publish_status(|snapshot| snapshot.is_loading = true);
        LoadingGuard { session: self }
    }

    fn publish_status(&self, f: impl FnOnce(&mut InboxSnapshot)) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.snapshots.send_modify(f);
    }

    /// Resync after the stream missed events.
    fn resync(self: Arc<Self>, reason: &'static str) {
        if !self.network.is_online() {
            debug!(reason, "Offline, skipping resync");
            return;
        }
        info!(reason, "Resyncing inbox");
        tokio::spawn(async move {
            if let Err(e) = self.refresh().await {
                warn!(reason, error = %e, "Resync failed");
            }
        });
    }
}

struct LoadingGuard<'a> {
    session: &'a SyncSession,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let remaining = self.session.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            self.session
                .publish_status(|snapshot| snapshot.is_loading = false);
        }
    }
}

/// Feed channel messages into the processor until shutdown.
async fn run_stream(
    session: Weak<SyncSession>,
    mut lease: ChannelLease,
    processor: EventProcessor,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interrupted = false;
    publish_stream_state(&session, lease.state());

    loop {
        let message = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            message = lease.recv() => message,
        };

        match message {
            Ok(ChannelMessage::Change(event)) => {
                processor.process(&event);
            }
            Ok(ChannelMessage::State(state)) => {
                publish_stream_state(&session, state);
                match state {
                    SubscriptionState::Errored | SubscriptionState::TimedOut => interrupted = true,
                    SubscriptionState::Subscribed if interrupted => {
                        interrupted = false;
                        if let Some(session) = session.upgrade() {
                            session.resync("reconnected");
                        }
                    }
                    _ => {}
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Change stream lagged");
                if let Some(session) = session.upgrade() {
                    session.resync("lagged");
                }
            }
            Err(RecvError::Closed) => break,
        }
    }

    debug!(topic = %lease.topic(), "Change stream stopped");
}

fn publish_stream_state(session: &Weak<SyncSession>, state: SubscriptionState) {
    if let Some(session) = session.upgrade() {
        session.publish_status(|snapshot| snapshot.stream_state = state);
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
