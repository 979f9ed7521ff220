//! Transport seam between the subscription manager and the wire.

use crate::RealtimeResult;
use async_trait::async_trait;
use inbox_types::ChangeEvent;
use tokio::sync::mpsc;

/// Buffer between a transport's reader task and the manager.
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// What to subscribe to.
#[derive(Clone)]
pub struct ChannelParams {
    /// Registry key; one channel per topic.
    pub topic: String,
    /// Rows are filtered server-side with `user_id=eq.<user_id>`.
    pub user_id: String,
    pub access_token: String,
}

impl ChannelParams {
    /// Per-user notifications topic.
    pub fn for_user(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            topic: format!("notifications:{}", user_id),
            user_id,
            access_token: access_token.into(),
        }
    }

    /// Server-side row filter.
    pub fn filter(&self) -> String {
        format!("user_id=eq.{}", self.user_id)
    }
}

impl std::fmt::Debug for ChannelParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelParams")
            .field("topic", &self.topic)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// An established channel.
///
/// Yields change events until the channel fails (`Some(Err)`) or the
/// connection closes (`None`). Dropping it tears the channel down.
pub struct ChannelSubscription {
    events: mpsc::Receiver<RealtimeResult<ChangeEvent>>,
}

impl ChannelSubscription {
    pub fn new(events: mpsc::Receiver<RealtimeResult<ChangeEvent>>) -> Self {
        Self { events }
    }

    /// Create a subscription fed by the returned sender.
    pub fn channel() -> (mpsc::Sender<RealtimeResult<ChangeEvent>>, Self) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        (tx, Self::new(rx))
    }

    pub async fn next(&mut self) -> Option<RealtimeResult<ChangeEvent>> {
        self.events.recv().await
    }
}

/// Opens realtime channels.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open a channel and return once the server has acknowledged the join.
    async fn subscribe(&self, params: &ChannelParams) -> RealtimeResult<ChannelSubscription>;
}
