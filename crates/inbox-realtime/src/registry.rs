//! Reference-counted channel registry.
//!
//! Consumers acquire a [`ChannelLease`] per topic. The first lease spawns a
//! [`SubscriptionManager`]; later leases share it. Dropping the last lease
//! stops the manager and closes the channel.

use crate::{
    ChannelMessage, ChannelParams, ManagerOptions, RealtimeTransport, SubscriptionManager,
    SubscriptionState,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Fan-out buffer per channel.
const CHANNEL_EVENT_BUFFER: usize = 1024;

struct ChannelEntry {
    generation: u64,
    leases: usize,
    events: broadcast::Sender<ChannelMessage>,
    state: watch::Receiver<SubscriptionState>,
    shutdown: watch::Sender<bool>,
}

#[derive(Default)]
struct Channels {
    entries: HashMap<String, ChannelEntry>,
    next_generation: u64,
}

/// Shares one realtime subscription per topic among any number of consumers.
pub struct ChannelRegistry {
    transport: Arc<dyn RealtimeTransport>,
    options: ManagerOptions,
    channels: Arc<Mutex<Channels>>,
}

impl ChannelRegistry {
    pub fn new(transport: Arc<dyn RealtimeTransport>, options: ManagerOptions) -> Self {
        Self {
            transport,
            options,
            channels: Arc::new(Mutex::new(Channels::default())),
        }
    }

    /// Take a lease on `params.topic`, opening the channel if nobody holds one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn acquire(&self, params: ChannelParams) -> ChannelLease {
        let mut channels = self.channels.lock();

        if let Some(entry) = channels.entries.get_mut(&params.topic) {
            entry.leases += 1;
            debug!(topic = %params.topic, leases = entry.leases, "Channel lease shared");
            return ChannelLease {
                topic: params.topic,
                generation: entry.generation,
                events: entry.events.subscribe(),
                state: entry.state.clone(),
                channels: Arc::downgrade(&self.channels),
            };
        }

        channels.next_generation += 1;
        let generation = channels.next_generation;

        let (events_tx, events_rx) = broadcast::channel(CHANNEL_EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Unsubscribed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let topic = params.topic.clone();
        let manager = SubscriptionManager::new(
            self.transport.clone(),
            params,
            self.options,
            events_tx.clone(),
            state_tx,
        );
        tokio::spawn(manager.run(shutdown_rx));

        channels.entries.insert(
            topic.clone(),
            ChannelEntry {
                generation,
                leases: 1,
                events: events_tx,
                state: state_rx.clone(),
                shutdown: shutdown_tx,
            },
        );
        info!(topic = %topic, "Channel opened");

        ChannelLease {
            topic,
            generation,
            events: events_rx,
            state: state_rx,
            channels: Arc::downgrade(&self.channels),
        }
    }

    /// Number of open channels.
    pub fn active_channels(&self) -> usize {
        self.channels.lock().entries.len()
    }

    /// Outstanding leases on `topic`.
    pub fn lease_count(&self, topic: &str) -> usize {
        self.channels
            .lock()
            .entries
            .get(topic)
            .map(|entry| entry.leases)
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("active_channels", &self.active_channels())
            .finish_non_exhaustive()
    }
}

/// A consumer's share of a channel. Dropping it releases the share.
pub struct ChannelLease {
    topic: String,
    generation: u64,
    events: broadcast::Receiver<ChannelMessage>,
    state: watch::Receiver<SubscriptionState>,
    channels: Weak<Mutex<Channels>>,
}

impl ChannelLease {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Current subscription state.
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Watch handle on the subscription state.
    pub fn state_watch(&self) -> watch::Receiver<SubscriptionState> {
        self.state.clone()
    }

    /// Next message; `Lagged` means this consumer fell behind and missed some.
    pub async fn recv(&mut self) -> Result<ChannelMessage, RecvError> {
        self.events.recv().await
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let mut channels = channels.lock();

        let Some(entry) = channels.entries.get_mut(&self.topic) else {
            return;
        };
        if entry.generation != self.generation {
            return;
        }

        entry.leases -= 1;
        debug!(topic = %self.topic, leases = entry.leases, "Channel lease released");

        if entry.leases == 0 {
            if let Some(entry) = channels.entries.remove(&self.topic) {
                let _ = entry.shutdown.send(true);
                info!(topic = %self.topic, "Channel closed");
            }
        }
    }
}
