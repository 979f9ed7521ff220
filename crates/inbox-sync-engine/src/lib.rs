//! Client-side realtime sync engine for a user's notification inbox.
//!
//! ```text
//! mark_as_read ─▶ MutationQueue ─▶ MutationExecutor ─┐
//!                                                    ├─▶ InboxCache ─▶ InboxSnapshot
//! ChannelLease ─▶ EventProcessor ─▶ DedupStore ──────┘        ▲
//!                                                             │
//! refresh ─▶ NotificationsApi ─▶ FreezeController ────────────┘
//! ```
//!
//! Three unordered sources feed one cache: paginated list fetches, the
//! unread-count fetch, and the realtime change stream. Local mutations are
//! applied optimistically and rolled back on failure. [`NotificationInbox`]
//! is the entry point.

pub mod cache;
mod dedup;
mod error;
mod event_processor;
mod executor;
mod facade;
mod freeze;
mod mutation_queue;
mod network;
mod session;
mod snapshot;

pub use cache::{CacheState, InboxCache};
pub use dedup::{DedupStore, DEFAULT_CAPACITY, DEFAULT_RETENTION};
pub use error::{SyncError, SyncResult};
pub use event_processor::{EventProcessor, ProcessOutcome};
pub use executor::{MutationExecutor, MutationKind};
pub use facade::{realtime_options, NotificationInbox};
pub use freeze::{FreezeController, DEFAULT_GRACE};
pub use mutation_queue::MutationQueue;
pub use network::{AlwaysOnline, NetworkMonitor, ToggleNetwork};
pub use snapshot::InboxSnapshot;
