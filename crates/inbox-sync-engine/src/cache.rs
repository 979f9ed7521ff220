//! Local copy of the inbox: the paginated `list` slice and the `summary` slice.
//!
//! Every write runs inside [`InboxCache::update`]: one short critical section,
//! no awaits, after which the revision is bumped and a fresh
//! [`InboxSnapshot`] is published. The cache never talks to the network.

use crate::InboxSnapshot;
use inbox_types::{Notification, NotificationPage, PageInfo};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Cached pages in recency order.
#[derive(Debug, Clone, Default)]
struct ListSlice {
    pages: Vec<Vec<Notification>>,
    page_info: PageInfo,
}

#[derive(Debug, Clone, Default)]
struct SummarySlice {
    /// `None` until the first summary fetch lands.
    unread_count: Option<u32>,
    frozen: bool,
    freeze_token: u64,
    /// Stream changes whose count effect is held back while frozen.
    held: Vec<HeldChange>,
    /// Read state of every row in the first page fetched under the current
    /// freeze, before tombstone filtering.
    fetched: Option<HashMap<String, bool>>,
}

/// A stream change applied while the counter was frozen.
#[derive(Debug, Clone)]
pub enum HeldChange {
    Insert(Notification),
    Update { row: Notification, delta: i64 },
    Delete { id: String, delta: i64 },
}

impl HeldChange {
    pub fn delta(&self) -> i64 {
        match self {
            Self::Insert(row) => i64::from(row.is_unread()),
            Self::Update { delta, .. } | Self::Delete { delta, .. } => *delta,
        }
    }
}

/// A row taken out of the list, with enough to put it back where it was.
#[derive(Debug, Clone)]
pub struct RemovedRow {
    pub notification: Notification,
    pub page: usize,
    pub index: usize,
}

/// Mutable cache contents, only reachable inside [`InboxCache::update`].
#[derive(Debug, Default)]
pub struct CacheState {
    /// `None` means the first page has not been cached yet.
    list: Option<ListSlice>,
    summary: SummarySlice,
    /// Ids removed by server deletes; nothing may bring them back.
    tombstones: HashSet<String>,
    /// Cached rows removed by a local delete still awaiting the server.
    pending_deletes: HashSet<String>,
    revision: u64,
}

impl CacheState {
    // ---- list ----

    pub fn has_first_page(&self) -> bool {
        self.list.is_some()
    }

    pub fn rows(&self) -> impl Iterator<Item = &Notification> {
        self.list.iter().flat_map(|list| list.pages.iter().flatten())
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut Notification> {
        self.list
            .iter_mut()
            .flat_map(|list| list.pages.iter_mut().flatten())
    }

    pub fn row(&self, id: &str) -> Option<&Notification> {
        self.rows().find(|n| n.id == id)
    }

    pub fn row_mut(&mut self, id: &str) -> Option<&mut Notification> {
        self.rows_mut().find(|n| n.id == id)
    }

    pub fn page_info(&self) -> Option<&PageInfo> {
        self.list.as_ref().map(|list| &list.page_info)
    }

    /// Put a new row at the top. Only when a first page is cached and the row
    /// is neither present nor tombstoned.
    pub fn prepend(&mut self, notification: Notification) -> bool {
        if self.tombstones.contains(&notification.id) || self.row(&notification.id).is_some() {
            return false;
        }
        let Some(list) = self.list.as_mut() else {
            return false;
        };
        match list.pages.first_mut() {
            Some(first) => first.insert(0, notification),
            None => list.pages.push(vec![notification]),
        }
        true
    }

    /// Swap in a newer image of an existing row, keeping its position.
    pub fn replace_row(&mut self, notification: Notification) -> bool {
        match self.row_mut(&notification.id) {
            Some(row) => {
                *row = notification;
                true
            }
            None => false,
        }
    }

    pub fn remove_row(&mut self, id: &str) -> Option<RemovedRow> {
        let list = self.list.as_mut()?;
        for (page, rows) in list.pages.iter_mut().enumerate() {
            if let Some(index) = rows.iter().position(|n| n.id == id) {
                let notification = rows.remove(index);
                return Some(RemovedRow {
                    notification,
                    page,
                    index,
                });
            }
        }
        None
    }

    /// Reinsert a removed row at its old position (clamped).
    pub fn restore_row(&mut self, removed: RemovedRow) -> bool {
        let id = removed.notification.id.clone();
        if self.tombstones.contains(&id) || self.row(&id).is_some() {
            return false;
        }
        let Some(list) = self.list.as_mut() else {
            return false;
        };
        if list.pages.is_empty() {
            list.pages.push(Vec::new());
        }
        let page = removed.page.min(list.pages.len() - 1);
        let rows = &mut list.pages[page];
        let index = removed.index.min(rows.len());
        rows.insert(index, removed.notification);
        true
    }

    /// Replace the whole list with a freshly fetched first page.
    ///
    /// While frozen, rows changed by held stream events that the page does
    /// not show yet are put back on top of it.
    pub fn set_first_page(&mut self, page: NotificationPage) {
        if self.summary.frozen {
            self.summary.fetched = Some(
                page.notifications
                    .iter()
                    .map(|n| (n.id.clone(), n.is_read))
                    .collect(),
            );
        }
        let rows = page
            .notifications
            .into_iter()
            .filter(|n| !self.tombstones.contains(&n.id))
            .collect();
        self.list = Some(ListSlice {
            pages: vec![rows],
            page_info: page.page_info,
        });
        if self.summary.frozen {
            self.replay_held_rows();
        }
    }

    fn replay_held_rows(&mut self) {
        let rows: Vec<Notification> = self
            .summary
            .held
            .iter()
            .filter(|change| !self.is_reflected(change))
            .filter_map(|change| match change {
                HeldChange::Insert(row) | HeldChange::Update { row, .. } => Some(row.clone()),
                HeldChange::Delete { .. } => None,
            })
            .collect();
        for row in rows {
            if !self.replace_row(row.clone()) {
                self.prepend(row);
            }
        }
    }

    /// Append a further page, skipping rows already cached. Returns how many
    /// rows were added.
    pub fn append_page(&mut self, page: NotificationPage) -> usize {
        if self.list.is_none() {
            return 0;
        }
        let rows: Vec<Notification> = page
            .notifications
            .into_iter()
            .filter(|n| !self.tombstones.contains(&n.id) && self.row(&n.id).is_none())
            .collect();
        let added = rows.len();

        if let Some(list) = self.list.as_mut() {
            list.pages.push(rows);
            list.page_info = page.page_info;
        }
        added
    }

    // ---- summary ----

    pub fn unread_count(&self) -> Option<u32> {
        self.summary.unread_count
    }

    pub fn set_unread_count(&mut self, count: u32) {
        self.summary.unread_count = Some(count);
    }

    /// Apply a local delta. Never goes below zero; no-op until a count is cached.
    pub fn adjust_unread(&mut self, delta: i64) {
        if let Some(count) = self.summary.unread_count.as_mut() {
            *count = (i64::from(*count) + delta).clamp(0, i64::from(u32::MAX)) as u32;
        }
    }

    /// Apply the count effect of a stream change, or hold the change back
    /// while frozen. Returns `false` when it was held back.
    pub fn apply_stream_change(&mut self, change: HeldChange) -> bool {
        if self.summary.frozen {
            self.summary.held.push(change);
            return false;
        }
        self.adjust_unread(change.delta());
        true
    }

    /// Whether the page fetched under this freeze already shows `change`.
    /// Without a fetched page the refreshed count is taken as authoritative.
    fn is_reflected(&self, change: &HeldChange) -> bool {
        let Some(fetched) = self.summary.fetched.as_ref() else {
            return true;
        };
        match change {
            // A row deleted later in the same freeze nets out either way.
            HeldChange::Insert(row) => {
                fetched.contains_key(&row.id) || self.tombstones.contains(&row.id)
            }
            HeldChange::Update { row, .. } => fetched
                .get(&row.id)
                .map_or(true, |is_read| *is_read == row.is_read),
            HeldChange::Delete { id, .. } => !fetched.contains_key(id),
        }
    }

    /// Take the held changes; returns the count delta of those the fetched
    /// page does not show yet.
    pub fn take_unreflected_delta(&mut self) -> i64 {
        let held = std::mem::take(&mut self.summary.held);
        held.iter()
            .filter(|change| !self.is_reflected(change))
            .map(HeldChange::delta)
            .sum()
    }

    /// Take the held changes; returns their whole count delta.
    pub fn take_held_delta(&mut self) -> i64 {
        std::mem::take(&mut self.summary.held)
            .iter()
            .map(HeldChange::delta)
            .sum()
    }

    pub fn held_len(&self) -> usize {
        self.summary.held.len()
    }

    pub fn is_frozen(&self) -> bool {
        self.summary.frozen
    }

    pub fn freeze_token(&self) -> u64 {
        self.summary.freeze_token
    }

    /// Freeze the summary and return the new token.
    pub fn freeze(&mut self) -> u64 {
        self.summary.frozen = true;
        self.summary.fetched = None;
        self.summary.freeze_token += 1;
        self.summary.freeze_token
    }

    pub fn unfreeze(&mut self) {
        self.summary.frozen = false;
        self.summary.fetched = None;
    }

    // ---- tombstones ----

    pub fn tombstone(&mut self, id: &str) {
        self.tombstones.insert(id.to_string());
    }

    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.tombstones.contains(id)
    }

    // ---- pending deletes ----

    pub fn begin_delete(&mut self, id: &str) {
        self.pending_deletes.insert(id.to_string());
    }

    pub fn end_delete(&mut self, id: &str) {
        self.pending_deletes.remove(id);
    }

    pub fn is_delete_pending(&self, id: &str) -> bool {
        self.pending_deletes.contains(id)
    }
}

/// Session-scoped cache that publishes a snapshot after every write.
pub struct InboxCache {
    state: Mutex<CacheState>,
    snapshots: Arc<watch::Sender<InboxSnapshot>>,
    detached: AtomicBool,
}

impl InboxCache {
    pub fn new(snapshots: Arc<watch::Sender<InboxSnapshot>>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            snapshots,
            detached: AtomicBool::new(false),
        }
    }

    /// Run one write against the cache and publish the result.
    pub fn update<R>(&self, f: impl FnOnce(&mut CacheState) -> R) -> R {
        let mut state = self.state.lock();
        let result = f(&mut state);
        state.revision += 1;
        self.publish(&state);
        result
    }

    pub fn read<R>(&self, f: impl FnOnce(&CacheState) -> R) -> R {
        f(&self.state.lock())
    }

    pub fn unread_count(&self) -> Option<u32> {
        self.read(|state| state.unread_count())
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.read(|state| state.rows().cloned().collect())
    }

    pub fn notification(&self, id: &str) -> Option<Notification> {
        self.read(|state| state.row(id).cloned())
    }

    /// Drop everything, including tombstones.
    pub fn clear(&self) {
        self.update(|state| {
            let revision = state.revision;
            *state = CacheState {
                revision,
                ..CacheState::default()
            };
        });
    }

    /// Stop publishing. Late writes from a closed session stay local.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    fn publish(&self, state: &CacheState) {
        if self.detached.load(Ordering::SeqCst) {
            return;
        }
        let notifications: Vec<Notification> = state.rows().cloned().collect();
        let unread_count = state.unread_count().unwrap_or(0);
        let has_more = state.page_info().is_some_and(|info| info.has_more);
        let revision = state.revision;

        self.snapshots.send_modify(|snapshot| {
            snapshot.notifications = notifications;
            snapshot.unread_count = unread_count;
            snapshot.has_more = has_more;
            snapshot.revision = revision;
        });
    }
}
