//! Freeze controller for the unread counter.
//!
//! While a summary refetch is in flight the counter is frozen: stream changes
//! still update rows but their count changes are held back. A successful
//! refetch replaces the counter with the server baseline plus the held-back
//! changes the fetched first page does not show yet; those it does show are
//! already counted. A failed refetch replays every held change. Each freeze
//! has a token; only the holder of the current token may settle or lift it.

use crate::InboxCache;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_GRACE: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct FreezeController {
    cache: Arc<InboxCache>,
    grace: Duration,
}

impl FreezeController {
    pub fn new(cache: Arc<InboxCache>, grace: Duration) -> Self {
        Self { cache, grace }
    }

    /// Freeze the counter; the returned token supersedes any earlier one.
    pub fn freeze(&self) -> u64 {
        let token = self.cache.update(|state| state.freeze());
        debug!(token, "Unread count frozen");
        token
    }

    pub fn is_frozen(&self) -> bool {
        self.cache.read(|state| state.is_frozen())
    }

    /// Adopt the refreshed baseline and lift the freeze after the grace period.
    /// Returns `false` if `token` has been superseded.
    pub fn settle_success(&self, token: u64, unread_count: u32) -> bool {
        let current = self.cache.update(|state| {
            if state.freeze_token() != token {
                return false;
            }
            let replayed = state.take_unreflected_delta();
            state.set_unread_count(unread_count);
            state.adjust_unread(replayed);
            debug!(token, unread_count, replayed, "Unread count baseline applied");
            true
        });

        if current {
            self.schedule_unfreeze(token);
        }
        current
    }

    /// Replay held-back deltas and lift the freeze at once.
    pub fn settle_failure(&self, token: u64) -> bool {
        self.cache.update(|state| {
            if state.freeze_token() != token {
                return false;
            }
            let replayed = state.take_held_delta();
            state.adjust_unread(replayed);
            state.unfreeze();
            debug!(token, replayed, "Unread count unfrozen after failed refresh");
            true
        })
    }

    /// Lift the freeze if `token` is still current. Changes held during the
    /// grace period count unless the fetched page already shows them.
    pub fn unfreeze(&self, token: u64) -> bool {
        self.cache.update(|state| {
            if state.freeze_token() != token || !state.is_frozen() {
                return false;
            }
            let replayed = state.take_unreflected_delta();
            state.adjust_unread(replayed);
            state.unfreeze();
            debug!(token, replayed, "Unread count unfrozen");
            true
        })
    }

    fn schedule_unfreeze(&self, token: u64) {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(controller.grace).await;
            controller.unfreeze(token);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::HeldChange;
    use crate::InboxSnapshot;
    use chrono::{TimeZone, Utc};
    use inbox_types::{Notification, NotificationPage, NotificationType, PageInfo};
    use tokio::sync::watch;

    fn unread(id: &str) -> Notification {
        Notification {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            notification_type: NotificationType::Mention,
            title: "Mention".to_string(),
            message: String::new(),
            link: None,
            is_read: false,
            read_at: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            batch_count: None,
        }
    }

    fn first_page(ids: &[&str]) -> NotificationPage {
        NotificationPage {
            notifications: ids.iter().map(|id| unread(id)).collect(),
            page_info: PageInfo::default(),
        }
    }

    fn controller() -> (FreezeController, Arc<InboxCache>) {
        let (tx, _rx) = watch::channel(InboxSnapshot::default());
        let cache = Arc::new(InboxCache::new(Arc::new(tx)));
        cache.update(|state| state.set_unread_count(3));
        (FreezeController::new(cache.clone(), DEFAULT_GRACE), cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_keeps_changes_already_in_baseline() {
        let (freeze, cache) = controller();
        let token = freeze.freeze();
        cache.update(|state| state.apply_stream_change(HeldChange::Insert(unread("d"))));
        assert_eq!(cache.unread_count(), Some(3));

        cache.update(|state| state.set_first_page(first_page(&["d", "c", "b", "a"])));

        assert!(freeze.settle_success(token, 4));
        assert_eq!(cache.unread_count(), Some(4));
        assert!(freeze.is_frozen());

        tokio::time::sleep(DEFAULT_GRACE + Duration::from_millis(1)).await;
        assert!(!freeze.is_frozen());
        assert_eq!(cache.unread_count(), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_adds_changes_missing_from_baseline() {
        let (freeze, cache) = controller();
        let token = freeze.freeze();
        cache.update(|state| state.set_first_page(first_page(&["c", "b", "a"])));
        cache.update(|state| state.apply_stream_change(HeldChange::Insert(unread("d"))));

        assert!(freeze.settle_success(token, 3));
        assert_eq!(cache.unread_count(), Some(4));

        // Delivered during the grace period, after the page was read.
        cache.update(|state| state.apply_stream_change(HeldChange::Insert(unread("e"))));
        assert_eq!(cache.unread_count(), Some(4));

        tokio::time::sleep(DEFAULT_GRACE + Duration::from_millis(1)).await;
        assert!(!freeze.is_frozen());
        assert_eq!(cache.unread_count(), Some(5));
    }

    #[tokio::test]
    async fn test_failure_replays_held_deltas() {
        let (freeze, cache) = controller();
        let token = freeze.freeze();
        cache.update(|state| {
            state.apply_stream_change(HeldChange::Insert(unread("d")));
            state.apply_stream_change(HeldChange::Insert(unread("e")));
            state.apply_stream_change(HeldChange::Delete {
                id: "a".to_string(),
                delta: -1,
            });
        });

        assert!(freeze.settle_failure(token));
        assert!(!freeze.is_frozen());
        assert_eq!(cache.unread_count(), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_cannot_lift_newer_freeze() {
        let (freeze, cache) = controller();
        let first = freeze.freeze();
        assert!(freeze.settle_success(first, 3));

        let second = freeze.freeze();
        tokio::time::sleep(DEFAULT_GRACE * 2).await;
        assert!(freeze.is_frozen());

        assert!(!freeze.settle_success(first, 10));
        assert_eq!(cache.unread_count(), Some(3));
        assert!(freeze.unfreeze(second));
        assert!(!freeze.is_frozen());
    }
}
