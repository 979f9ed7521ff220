//! Realtime change feed for the notification inbox.
//!
//! ```text
//! ChannelRegistry ──lease──▶ SubscriptionManager ──▶ RealtimeTransport ──▶ Supabase realtime
//!        ▲                          │
//!        └──── ChannelMessage ◀─────┘ (broadcast)
//! ```
//!
//! - [`RealtimeTransport`]: opens a channel; [`SupabaseRealtimeTransport`] speaks
//!   the Phoenix protocol over WebSocket
//! - [`SubscriptionManager`]: state machine with jittered exponential backoff
//! - [`ChannelRegistry`]: one channel per topic, shared through leases

mod backoff;
mod error;
mod manager;
pub mod messages;
mod registry;
mod supabase;
mod transport;

pub use backoff::BackoffPolicy;
pub use error::{RealtimeError, RealtimeResult};
pub use manager::{ChannelMessage, ManagerOptions, SubscriptionManager, SubscriptionState};
pub use registry::{ChannelLease, ChannelRegistry};
pub use supabase::SupabaseRealtimeTransport;
pub use transport::{ChannelParams, ChannelSubscription, RealtimeTransport, SUBSCRIPTION_BUFFER};
