//! Subscription manager: keeps one realtime channel alive.
//!
//! ```text
//! Unsubscribed → Subscribing → Subscribed → (Errored | TimedOut) → Subscribing → …
//! ```
//!
//! Failures are logged and retried with [`BackoffPolicy`]; they are never
//! surfaced as errors to consumers, only as state changes.

use crate::{BackoffPolicy, ChannelParams, RealtimeTransport};
use inbox_types::ChangeEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Lifecycle of a realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
    Errored,
    TimedOut,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Subscribing => "subscribing",
            Self::Subscribed => "subscribed",
            Self::Errored => "errored",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fan-out item: change events and state transitions share one ordered stream.
#[derive(Debug, Clone)]
pub enum ChannelMessage {
    Change(ChangeEvent),
    State(SubscriptionState),
}

/// Retry and timeout settings.
#[derive(Debug, Clone, Copy)]
pub struct ManagerOptions {
    pub subscribe_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            subscribe_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Drives one channel until told to stop.
pub struct SubscriptionManager {
    transport: Arc<dyn RealtimeTransport>,
    params: ChannelParams,
    options: ManagerOptions,
    events: broadcast::Sender<ChannelMessage>,
    state: watch::Sender<SubscriptionState>,
}

impl SubscriptionManager {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        params: ChannelParams,
        options: ManagerOptions,
        events: broadcast::Sender<ChannelMessage>,
        state: watch::Sender<SubscriptionState>,
    ) -> Self {
        Self {
            transport,
            params,
            options,
            events,
            state,
        }
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let topic = self.params.topic.clone();
        let mut attempt: u32 = 0;

        info!(topic = %topic, "Subscription manager started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_state(SubscriptionState::Subscribing);

            let subscribe = tokio::time::timeout(
                self.options.subscribe_timeout,
                self.transport.subscribe(&self.params),
            );
            let outcome = tokio::select! {
                _ = stopped(&mut shutdown) => break,
                outcome = subscribe => outcome,
            };

            match outcome {
                Ok(Ok(mut subscription)) => {
                    attempt = 0;
                    self.set_state(SubscriptionState::Subscribed);

                    loop {
                        let item = tokio::select! {
                            _ = stopped(&mut shutdown) => {
                                self.set_state(SubscriptionState::Unsubscribed);
                                info!(topic = %topic, "Subscription manager stopped");
                                return;
                            }
                            item = subscription.next() => item,
                        };

                        match item {
                            Some(Ok(event)) => {
                                debug!(
                                    topic = %topic,
                                    event_type = event.event_type.as_str(),
                                    "Change event received"
                                );
                                let _ = self.events.send(ChannelMessage::Change(event));
                            }
                            Some(Err(e)) => {
                                warn!(topic = %topic, error = %e, "Realtime channel failed");
                                break;
                            }
                            None => {
                                warn!(topic = %topic, "Realtime channel closed");
                                break;
                            }
                        }
                    }
                    self.set_state(SubscriptionState::Errored);
                }
                Ok(Err(e)) => {
                    warn!(topic = %topic, attempt, error = %e, "Subscribe failed");
                    self.set_state(SubscriptionState::Errored);
                }
                Err(_) => {
                    warn!(
                        topic = %topic,
                        attempt,
                        timeout_ms = self.options.subscribe_timeout.as_millis() as u64,
                        "Subscribe timed out"
                    );
                    self.set_state(SubscriptionState::TimedOut);
                }
            }

            let delay = self.options.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            info!(
                topic = %topic,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Scheduling resubscribe"
            );

            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(SubscriptionState::Unsubscribed);
        info!(topic = %topic, "Subscription manager stopped");
    }

    fn set_state(&self, state: SubscriptionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(topic = %self.params.topic, from = %previous, to = %state, "Subscription state changed");
        }
        let _ = self.events.send(ChannelMessage::State(state));
    }
}

/// Resolves once shutdown is requested or the controlling side is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
