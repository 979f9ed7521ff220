//! Bounded, time-windowed set of handled identifiers.
//!
//! Two kinds of keys live here: realtime event ids
//! (`kind:notification_id:commit_timestamp`) and per-notification markers
//! (`notification:<id>`) recording that an insert has been merged.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

struct Entry {
    seq: u64,
    marked_at: Instant,
}

/// Insertion-ordered set with lazy expiry and bulk eviction.
///
/// The log may hold stale `(key, seq)` pairs for keys that were removed or
/// re-marked; they are skipped when the front is trimmed.
pub struct DedupStore {
    capacity: usize,
    retention: Duration,
    entries: HashMap<String, Entry>,
    log: VecDeque<(String, u64)>,
    next_seq: u64,
}

impl DedupStore {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            retention,
            entries: HashMap::new(),
            log: VecDeque::new(),
            next_seq: 0,
        }
    }

    /// `true` if `id` was already handled (discard); otherwise records it and
    /// returns `false` (process).
    pub fn check_and_mark(&mut self, id: &str) -> bool {
        let now = Instant::now();
        self.expire(now);

        if self.entries.contains_key(id) {
            return true;
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        self.entries.insert(
            id.to_string(),
            Entry {
                seq,
                marked_at: now,
            },
        );
        self.log.push_back((id.to_string(), seq));

        if self.entries.len() > self.capacity {
            self.evict_oldest_half();
        }
        false
    }

    /// Undo a mark, e.g. when the event turned out to be unusable.
    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Record that the insert for `notification_id` has been merged.
    /// Returns `true` if it already was.
    pub fn mark_notification(&mut self, notification_id: &str) -> bool {
        self.check_and_mark(&notification_key(notification_id))
    }

    pub fn release_notification(&mut self, notification_id: &str) {
        self.remove(&notification_key(notification_id));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| entry.marked_at.elapsed() < self.retention)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.log.clear();
    }

    /// Drop expired entries from the front of the log.
    fn expire(&mut self, now: Instant) {
        while let Some((key, seq)) = self.log.front() {
            let live = match self.entries.get(key) {
                Some(entry) if entry.seq == *seq => {
                    if now.duration_since(entry.marked_at) < self.retention {
                        break;
                    }
                    true
                }
                _ => false,
            };
            if live {
                self.entries.remove(key);
            }
            self.log.pop_front();
        }
    }

    fn evict_oldest_half(&mut self) {
        let target = self.entries.len() / 2;
        let mut evicted = 0;

        while evicted < target {
            let Some((key, seq)) = self.log.pop_front() else {
                break;
            };
            if self.entries.get(&key).is_some_and(|entry| entry.seq == seq) {
                self.entries.remove(&key);
                evicted += 1;
            }
        }

        debug!(evicted, remaining = self.entries.len(), "Dedup store evicted oldest half");
    }
}

impl Default for DedupStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_RETENTION)
    }
}

fn notification_key(notification_id: &str) -> String {
    format!("notification:{}", notification_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_seen_is_processed_then_discarded() {
        let mut store = DedupStore::default();
        assert!(!store.check_and_mark("insert:n-1:t1"));
        assert!(store.check_and_mark("insert:n-1:t1"));
        assert!(!store.check_and_mark("insert:n-1:t2"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_remove_reverses_mark() {
        let mut store = DedupStore::default();
        store.check_and_mark("update:n-1:t1");
        assert!(store.remove("update:n-1:t1"));
        assert!(!store.check_and_mark("update:n-1:t1"));
    }

    #[test]
    fn test_remarked_key_survives_stale_log_entry() {
        let mut store = DedupStore::new(4, DEFAULT_RETENTION);
        store.check_and_mark("a");
        store.remove("a");
        store.check_and_mark("a");
        for key in ["b", "c", "d"] {
            store.check_and_mark(key);
        }
        // Over capacity: the stale first "a" must not count as an eviction.
        store.check_and_mark("e");
        assert_eq!(store.len(), 3);
        assert!(!store.contains("a"));
        assert!(!store.contains("b"));
        assert!(store.contains("c"));
    }

    #[test]
    fn test_over_capacity_evicts_oldest_half() {
        let mut store = DedupStore::new(10, DEFAULT_RETENTION);
        for i in 0..11 {
            store.check_and_mark(&format!("event-{}", i));
        }

        assert_eq!(store.len(), 6);
        for i in 0..5 {
            assert!(!store.contains(&format!("event-{}", i)));
        }
        for i in 5..11 {
            assert!(store.contains(&format!("event-{}", i)));
        }
    }

    #[test]
    fn test_notification_marker() {
        let mut store = DedupStore::default();
        assert!(!store.mark_notification("n-1"));
        assert!(store.mark_notification("n-1"));

        store.release_notification("n-1");
        assert!(!store.mark_notification("n-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_retention() {
        let mut store = DedupStore::new(100, Duration::from_secs(300));
        store.check_and_mark("old");

        tokio::time::advance(Duration::from_secs(200)).await;
        store.check_and_mark("newer");

        tokio::time::advance(Duration::from_secs(101)).await;
        assert!(!store.contains("old"));
        assert!(!store.check_and_mark("old"));
        assert!(store.check_and_mark("newer"));
    }
}
