//! Optimistic mutation executor.
//!
//! Each intent is applied to the cache before the server call, with a
//! pre-image of exactly the fields it touched. On failure only rows that
//! still carry the values the intent wrote are reverted, and the count is
//! restored by the delta of those rows alone, so stream events applied in
//! the meantime survive the rollback.

use crate::cache::RemovedRow;
use crate::{InboxCache, SyncResult};
use chrono::{DateTime, Utc};
use inbox_data_api::NotificationsApi;
use std::sync::Arc;
use tracing::{debug, warn};

/// A locally initiated write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    MarkRead(String),
    MarkAllRead,
    Delete(String),
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarkRead(_) => "mark_read",
            Self::MarkAllRead => "mark_all_read",
            Self::Delete(_) => "delete",
        }
    }

    /// Target notification id, or `all`.
    pub fn target(&self) -> &str {
        match self {
            Self::MarkRead(id) | Self::Delete(id) => id,
            Self::MarkAllRead => "all",
        }
    }
}

/// What an intent changed, captured while applying it.
#[derive(Debug)]
enum Preimage {
    /// Row was already read (or not cached): nothing to send or undo.
    Noop,
    MarkRead {
        id: String,
        read_at: DateTime<Utc>,
        decremented: bool,
    },
    MarkAllRead {
        flipped: Vec<String>,
        read_at: DateTime<Utc>,
        previous_count: Option<u32>,
    },
    Delete {
        removed: Option<RemovedRow>,
        decremented: bool,
    },
}

pub struct MutationExecutor {
    api: Arc<dyn NotificationsApi>,
    cache: Arc<InboxCache>,
}

impl MutationExecutor {
    pub fn new(api: Arc<dyn NotificationsApi>, cache: Arc<InboxCache>) -> Self {
        Self { api, cache }
    }

    /// Apply, call the server, and roll back on failure.
    pub async fn execute(&self, kind: &MutationKind, version: u64) -> SyncResult<()> {
        let preimage = self.apply(kind);
        if matches!(preimage, Preimage::Noop) {
            debug!(kind = kind.as_str(), target = kind.target(), version, "Mutation is a no-op");
            return Ok(());
        }

        let result = match kind {
            MutationKind::MarkRead(id) => self.api.mark_notification_as_read(id).await,
            MutationKind::MarkAllRead => self.api.mark_all_notifications_as_read().await,
            MutationKind::Delete(id) => self.api.delete_notification_by_id(id).await,
        };

        match result {
            Ok(()) => {
                if let (MutationKind::Delete(id), Preimage::Delete { removed: Some(_), .. }) =
                    (kind, &preimage)
                {
                    self.cache.update(|state| {
                        state.end_delete(id);
                        state.tombstone(id);
                    });
                }
                debug!(kind = kind.as_str(), target = kind.target(), version, "Mutation confirmed");
                Ok(())
            }
            Err(e) => {
                warn!(
                    kind = kind.as_str(),
                    target = kind.target(),
                    version,
                    error = %e,
                    "Mutation failed, rolling back"
                );
                self.rollback(preimage);
                Err(e.into())
            }
        }
    }

    fn apply(&self, kind: &MutationKind) -> Preimage {
        let now = Utc::now();

        self.cache.update(|state| match kind {
            MutationKind::MarkRead(id) => {
                let decremented = state.unread_count().is_some();
                match state.row_mut(id) {
                    Some(row) if !row.is_read => {
                        row.is_read = true;
                        row.read_at = Some(now);
                    }
                    // Uncached rows may sit on a page we never loaded.
                    None => {
                        return Preimage::MarkRead {
                            id: id.clone(),
                            read_at: now,
                            decremented: false,
                        }
                    }
                    Some(_) => return Preimage::Noop,
                }
                state.adjust_unread(-1);
                Preimage::MarkRead {
                    id: id.clone(),
                    read_at: now,
                    decremented,
                }
            }
            MutationKind::MarkAllRead => {
                let previous_count = state.unread_count();
                let mut flipped = Vec::new();
                for row in state.rows_mut().filter(|row| !row.is_read) {
                    row.is_read = true;
                    row.read_at = Some(now);
                    flipped.push(row.id.clone());
                }
                if previous_count.is_some() {
                    state.set_unread_count(0);
                }
                Preimage::MarkAllRead {
                    flipped,
                    read_at: now,
                    previous_count,
                }
            }
            MutationKind::Delete(id) => {
                let removed = state.remove_row(id);
                if removed.is_some() {
                    state.begin_delete(id);
                }
                let was_unread = removed.as_ref().is_some_and(|r| !r.notification.is_read);
                let decremented = was_unread && state.unread_count().is_some();
                if was_unread {
                    state.adjust_unread(-1);
                }
                Preimage::Delete {
                    removed,
                    decremented,
                }
            }
        })
    }

    fn rollback(&self, preimage: Preimage) {
        self.cache.update(|state| match preimage {
            Preimage::Noop => {}
            Preimage::MarkRead {
                id,
                read_at,
                decremented,
            } => {
                let reverted = match state.row_mut(&id) {
                    Some(row) if row.is_read && row.read_at == Some(read_at) => {
                        row.is_read = false;
                        row.read_at = None;
                        true
                    }
                    _ => false,
                };
                if reverted && decremented {
                    state.adjust_unread(1);
                }
                debug!(notification_id = %id, reverted, "Rolled back mark-read");
            }
            Preimage::MarkAllRead {
                flipped,
                read_at,
                previous_count,
            } => {
                let mut kept = 0u32;
                for id in &flipped {
                    match state.row_mut(id) {
                        Some(row) if row.is_read && row.read_at == Some(read_at) => {
                            row.is_read = false;
                            row.read_at = None;
                        }
                        _ => kept += 1,
                    }
                }
                if let Some(previous) = previous_count {
                    state.adjust_unread(i64::from(previous.saturating_sub(kept)));
                }
                debug!(
                    flipped = flipped.len(),
                    kept,
                    "Rolled back mark-all-read"
                );
            }
            Preimage::Delete {
                removed,
                decremented,
            } => {
                let Some(removed) = removed else {
                    return;
                };
                let id = removed.notification.id.clone();
                state.end_delete(&id);
                let was_unread = !removed.notification.is_read;
                let restored = state.restore_row(removed);
                if restored && was_unread && decremented {
                    state.adjust_unread(1);
                }
                debug!(notification_id = %id, restored, "Rolled back delete");
            }
        });
    }
}
