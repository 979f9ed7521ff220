//! Applies realtime change events to the cache.
//!
//! Every event is checked against the dedup store first, so a redelivered
//! event is handled at most once. Count changes go through
//! `apply_stream_change`, which holds them back while the summary is frozen.
//! Unusable payloads are dropped and logged, never surfaced.

use crate::cache::HeldChange;
use crate::{DedupStore, InboxCache};
use inbox_types::{ChangeEvent, ChangeEventType};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Applied,
    Duplicate,
    /// Payload failed validation; the dedup mark was reversed.
    Invalid,
    /// Valid but not for this inbox.
    Ignored,
}

pub struct EventProcessor {
    user_id: String,
    cache: Arc<InboxCache>,
    dedup: Arc<Mutex<DedupStore>>,
}

impl EventProcessor {
    pub fn new(user_id: impl Into<String>, cache: Arc<InboxCache>, dedup: Arc<Mutex<DedupStore>>) -> Self {
        Self {
            user_id: user_id.into(),
            cache,
            dedup,
        }
    }

    pub fn process(&self, event: &ChangeEvent) -> ProcessOutcome {
        let Some(event_id) = event.event_id() else {
            warn!(
                event_type = event.event_type.as_str(),
                "Dropping change event without notification id"
            );
            return ProcessOutcome::Invalid;
        };

        if self.dedup.lock().check_and_mark(&event_id) {
            debug!(event_id = %event_id, "Duplicate change event");
            return ProcessOutcome::Duplicate;
        }

        let outcome = match event.event_type {
            ChangeEventType::Insert => self.on_insert(event, &event_id),
            ChangeEventType::Update => self.on_update(event, &event_id),
            ChangeEventType::Delete => self.on_delete(event),
        };
        debug!(event_id = %event_id, ?outcome, "Change event processed");
        outcome
    }

    fn on_insert(&self, event: &ChangeEvent, event_id: &str) -> ProcessOutcome {
        let notification = match event.parse_record() {
            Ok(notification) => notification,
            Err(e) => {
                self.dedup.lock().remove(event_id);
                warn!(event_id = %event_id, error = %e, "Dropping invalid insert payload");
                return ProcessOutcome::Invalid;
            }
        };
        if notification.user_id != self.user_id {
            return ProcessOutcome::Ignored;
        }
        if self.dedup.lock().mark_notification(&notification.id) {
            debug!(notification_id = %notification.id, "Insert already merged");
            return ProcessOutcome::Duplicate;
        }

        self.cache.update(|state| {
            if state.is_tombstoned(&notification.id) || state.row(&notification.id).is_some() {
                return;
            }
            state.prepend(notification.clone());
            state.apply_stream_change(HeldChange::Insert(notification));
        });
        ProcessOutcome::Applied
    }

    fn on_update(&self, event: &ChangeEvent, event_id: &str) -> ProcessOutcome {
        let notification = match event.parse_record() {
            Ok(notification) => notification,
            Err(e) => {
                self.dedup.lock().remove(event_id);
                warn!(event_id = %event_id, error = %e, "Dropping invalid update payload");
                return ProcessOutcome::Invalid;
            }
        };
        if notification.user_id != self.user_id {
            return ProcessOutcome::Ignored;
        }

        self.cache.update(|state| {
            // The cached row is the best record of what the count already reflects.
            let was_read = state
                .row(&notification.id)
                .map(|row| row.is_read)
                .or_else(|| event.old_is_read());
            let now_read = notification.is_read;

            // Unknown previous state (uncached row, no `is_read` in the old
            // image) leaves the count to the next refresh.
            let delta = match was_read {
                Some(false) if now_read => -1,
                Some(true) if !now_read => 1,
                _ => 0,
            };
            state.replace_row(notification.clone());
            state.apply_stream_change(HeldChange::Update {
                row: notification,
                delta,
            });
        });
        ProcessOutcome::Applied
    }

    fn on_delete(&self, event: &ChangeEvent) -> ProcessOutcome {
        let Some(id) = event.notification_id().map(str::to_string) else {
            return ProcessOutcome::Invalid;
        };
        self.dedup.lock().release_notification(&id);

        self.cache.update(|state| {
            let was_unread = match state.remove_row(&id) {
                Some(removed) => !removed.notification.is_read,
                // Removal already counted by an earlier delete, local or remote.
                None if state.is_tombstoned(&id) || state.is_delete_pending(&id) => false,
                None => event.old_is_read() == Some(false),
            };
            state.tombstone(&id);
            if was_unread {
                state.apply_stream_change(HeldChange::Delete { id, delta: -1 });
            }
        });
        ProcessOutcome::Applied
    }
}
