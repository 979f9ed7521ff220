//! Subscription manager and channel registry behavior against a scripted transport.

use async_trait::async_trait;
use inbox_realtime::{
    BackoffPolicy, ChannelMessage, ChannelParams, ChannelRegistry, ChannelSubscription,
    ManagerOptions, RealtimeError, RealtimeResult, RealtimeTransport, SubscriptionState,
};
use inbox_types::{ChangeEvent, ChangeEventType};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

enum Step {
    Fail,
    Hang,
    Accept,
}

#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    open: Mutex<Vec<mpsc::Sender<RealtimeResult<ChangeEvent>>>>,
}

impl ScriptedTransport {
    fn with_script(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            ..Default::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn latest(&self) -> mpsc::Sender<RealtimeResult<ChangeEvent>> {
        self.open.lock().last().cloned().expect("no open subscription")
    }
}

#[async_trait]
impl RealtimeTransport for ScriptedTransport {
    async fn subscribe(&self, _params: &ChannelParams) -> RealtimeResult<ChannelSubscription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front().unwrap_or(Step::Accept);
        match step {
            Step::Fail => Err(RealtimeError::JoinRejected("scripted".to_string())),
            Step::Hang => std::future::pending().await,
            Step::Accept => {
                let (tx, subscription) = ChannelSubscription::channel();
                self.open.lock().push(tx);
                Ok(subscription)
            }
        }
    }
}

fn options() -> ManagerOptions {
    ManagerOptions {
        subscribe_timeout: Duration::from_secs(10),
        backoff: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30)),
    }
}

fn params() -> ChannelParams {
    ChannelParams::for_user("user-1", "token")
}

fn insert(id: &str) -> ChangeEvent {
    ChangeEvent {
        event_type: ChangeEventType::Insert,
        new: Some(json!({"id": id, "user_id": "user-1", "type": "like"})),
        old: None,
        commit_timestamp: "2024-05-01T10:00:00Z".to_string(),
    }
}

async fn next_state(lease: &mut inbox_realtime::ChannelLease) -> SubscriptionState {
    loop {
        if let ChannelMessage::State(state) = lease.recv().await.unwrap() {
            return state;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_retries_until_subscribed() {
    let transport = ScriptedTransport::with_script(vec![Step::Fail, Step::Fail, Step::Accept]);
    let registry = ChannelRegistry::new(transport.clone(), options());
    let mut lease = registry.acquire(params());

    let expected = [
        SubscriptionState::Subscribing,
        SubscriptionState::Errored,
        SubscriptionState::Subscribing,
        SubscriptionState::Errored,
        SubscriptionState::Subscribing,
        SubscriptionState::Subscribed,
    ];
    for state in expected {
        assert_eq!(next_state(&mut lease).await, state);
    }
    assert_eq!(transport.calls(), 3);
    assert_eq!(lease.state(), SubscriptionState::Subscribed);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_timeout() {
    let transport = ScriptedTransport::with_script(vec![Step::Hang, Step::Accept]);
    let registry = ChannelRegistry::new(transport.clone(), options());
    let mut lease = registry.acquire(params());

    assert_eq!(next_state(&mut lease).await, SubscriptionState::Subscribing);
    let started = Instant::now();
    assert_eq!(next_state(&mut lease).await, SubscriptionState::TimedOut);
    assert_eq!(started.elapsed(), Duration::from_secs(10));

    assert_eq!(next_state(&mut lease).await, SubscriptionState::Subscribing);
    assert_eq!(next_state(&mut lease).await, SubscriptionState::Subscribed);
}

#[tokio::test(start_paused = true)]
async fn test_attempts_reset_after_success() {
    let transport =
        ScriptedTransport::with_script(vec![Step::Fail, Step::Fail, Step::Fail, Step::Accept]);
    let registry = ChannelRegistry::new(transport.clone(), options());
    let mut lease = registry.acquire(params());

    while next_state(&mut lease).await != SubscriptionState::Subscribed {}

    // Break the established channel.
    drop(transport.open.lock().pop());
    assert_eq!(next_state(&mut lease).await, SubscriptionState::Errored);

    let failed_at = Instant::now();
    assert_eq!(next_state(&mut lease).await, SubscriptionState::Subscribing);
    assert!(failed_at.elapsed() <= Duration::from_secs(1));
    assert_eq!(next_state(&mut lease).await, SubscriptionState::Subscribed);
}

#[tokio::test(start_paused = true)]
async fn test_channel_error_triggers_resubscribe() {
    let transport = ScriptedTransport::with_script(vec![]);
    let registry = ChannelRegistry::new(transport.clone(), options());
    let mut lease = registry.acquire(params());

    while next_state(&mut lease).await != SubscriptionState::Subscribed {}

    transport
        .latest()
        .send(Err(RealtimeError::Channel("boom".to_string())))
        .await
        .unwrap();

    assert_eq!(next_state(&mut lease).await, SubscriptionState::Errored);
    assert_eq!(next_state(&mut lease).await, SubscriptionState::Subscribing);
    assert_eq!(next_state(&mut lease).await, SubscriptionState::Subscribed);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_events_fan_out_to_every_lease() {
    let transport = ScriptedTransport::with_script(vec![]);
    let registry = ChannelRegistry::new(transport.clone(), options());
    let mut first = registry.acquire(params());
    let mut second = registry.acquire(params());

    while next_state(&mut first).await != SubscriptionState::Subscribed {}
    while next_state(&mut second).await != SubscriptionState::Subscribed {}

    transport.latest().send(Ok(insert("n-1"))).await.unwrap();

    for lease in [&mut first, &mut second] {
        match lease.recv().await.unwrap() {
            ChannelMessage::Change(event) => assert_eq!(event.notification_id(), Some("n-1")),
            other => panic!("expected change event, got {:?}", other),
        }
    }
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_last_lease_closes_channel() {
    let transport = ScriptedTransport::with_script(vec![]);
    let registry = ChannelRegistry::new(transport.clone(), options());
    let topic = params().topic;

    let mut first = registry.acquire(params());
    let second = registry.acquire(params());
    assert_eq!(registry.active_channels(), 1);
    assert_eq!(registry.lease_count(&topic), 2);

    while next_state(&mut first).await != SubscriptionState::Subscribed {}
    let sender = transport.latest();

    drop(second);
    assert_eq!(registry.lease_count(&topic), 1);
    assert!(!sender.is_closed());

    let mut state = first.state_watch();
    drop(first);
    assert_eq!(registry.active_channels(), 0);

    state
        .wait_for(|s| *s == SubscriptionState::Unsubscribed)
        .await
        .unwrap();
    sender.closed().await;
}

#[tokio::test]
async fn test_reacquire_after_release_opens_new_channel() {
    let transport = ScriptedTransport::with_script(vec![]);
    let registry = ChannelRegistry::new(transport.clone(), options());

    let mut lease = registry.acquire(params());
    while next_state(&mut lease).await != SubscriptionState::Subscribed {}
    drop(lease);

    let mut lease = registry.acquire(params());
    while next_state(&mut lease).await != SubscriptionState::Subscribed {}

    assert_eq!(registry.active_channels(), 1);
    assert_eq!(transport.calls(), 2);
}
