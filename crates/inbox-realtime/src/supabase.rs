//! Supabase realtime transport (Phoenix channels over WebSocket).

use crate::messages::{PhoenixMessage, Reply, EVENT_CLOSE, EVENT_ERROR, EVENT_POSTGRES_CHANGES};
use crate::{ChannelParams, ChannelSubscription, RealtimeError, RealtimeResult, RealtimeTransport};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use inbox_types::ChangeEvent;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Phoenix protocol version spoken on the socket.
const PROTOCOL_VSN: &str = "1.0.0";

/// Opens one WebSocket per channel against `<project>/realtime/v1/websocket`.
pub struct SupabaseRealtimeTransport {
    socket_url: Url,
    heartbeat_interval: Duration,
}

impl SupabaseRealtimeTransport {
    /// # Arguments
    /// * `project_url` - The Supabase project URL (`https://xyz.supabase.co`)
    /// * `api_key` - The Supabase publishable API key
    /// * `heartbeat_interval` - How often to ping the `phoenix` topic
    pub fn new(project_url: &Url, api_key: &str, heartbeat_interval: Duration) -> RealtimeResult<Self> {
        Ok(Self {
            socket_url: socket_url(project_url, api_key)?,
            heartbeat_interval,
        })
    }

    async fn join(&self, params: &ChannelParams) -> RealtimeResult<Socket> {
        let (mut socket, _) = connect_async(self.socket_url.as_str()).await?;

        let topic = channel_topic(params);
        let join_ref = uuid::Uuid::new_v4().to_string();
        let join = PhoenixMessage::join(&topic, &params.filter(), &params.access_token, &join_ref);
        socket.send(Message::Text(join.to_json()?.into())).await?;
        debug!(topic = %topic, "Sent phx_join");

        while let Some(frame) = socket.next().await {
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(_) => return Err(RealtimeError::ChannelClosed),
                _ => continue,
            };
            let msg = match PhoenixMessage::from_json(text.as_str()) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, "Failed to parse realtime frame");
                    continue;
                }
            };
            if msg.topic != topic || msg.reference.as_deref() != Some(join_ref.as_str()) {
                continue;
            }
            return match msg.reply() {
                Some(Reply::Ok) => Ok(socket),
                Some(Reply::Error(reason)) => Err(RealtimeError::JoinRejected(reason)),
                None => continue,
            };
        }

        Err(RealtimeError::ChannelClosed)
    }
}

#[async_trait]
impl RealtimeTransport for SupabaseRealtimeTransport {
    async fn subscribe(&self, params: &ChannelParams) -> RealtimeResult<ChannelSubscription> {
        let socket = self.join(params).await?;
        info!(topic = %params.topic, "Realtime channel joined");

        let (tx, subscription) = ChannelSubscription::channel();
        let (write, read) = socket.split();
        tokio::spawn(run_channel(
            channel_topic(params),
            write,
            read,
            tx,
            self.heartbeat_interval,
        ));

        Ok(subscription)
    }
}

impl std::fmt::Debug for SupabaseRealtimeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseRealtimeTransport")
            .field("host", &self.socket_url.host_str())
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}

/// Pump frames from the socket into the subscription until either side goes away.
async fn run_channel(
    topic: String,
    mut write: SplitSink<Socket, Message>,
    mut read: SplitStream<Socket>,
    tx: mpsc::Sender<RealtimeResult<ChangeEvent>>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let mut next_ref: u64 = 0;

    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!(topic = %topic, "Subscription dropped, leaving channel");
                next_ref += 1;
                if let Ok(json) = PhoenixMessage::leave(&topic, &next_ref.to_string()).to_json() {
                    let _ = write.send(Message::Text(json.into())).await;
                }
                let _ = write.close().await;
                return;
            }
            _ = heartbeat.tick() => {
                next_ref += 1;
                let sent = match PhoenixMessage::heartbeat(&next_ref.to_string()).to_json() {
                    Ok(json) => write.send(Message::Text(json.into())).await,
                    Err(_) => continue,
                };
                if let Err(e) = sent {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            }
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(topic = %topic, "Realtime connection closed");
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                };

                match handle_frame(&topic, text.as_str()) {
                    Frame::Event(event) => {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                    Frame::Failed(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                    Frame::Ignored => {}
                }
            }
        }
    }
}

enum Frame {
    Event(ChangeEvent),
    Failed(RealtimeError),
    Ignored,
}

fn handle_frame(topic: &str, text: &str) -> Frame {
    let msg = match PhoenixMessage::from_json(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "Failed to parse realtime frame");
            return Frame::Ignored;
        }
    };
    if msg.topic != topic {
        return Frame::Ignored;
    }

    if let Some(reason) = msg.system_error() {
        return Frame::Failed(RealtimeError::Channel(reason));
    }

    match msg.event.as_str() {
        EVENT_POSTGRES_CHANGES => match msg.change_event() {
            Ok(event) => Frame::Event(event),
            Err(e) => {
                warn!(error = %e, "Dropping undecodable change frame");
                Frame::Ignored
            }
        },
        EVENT_ERROR => Frame::Failed(RealtimeError::Channel("phx_error".to_string())),
        EVENT_CLOSE => Frame::Failed(RealtimeError::ChannelClosed),
        other => {
            debug!(event = other, "Ignoring realtime frame");
            Frame::Ignored
        }
    }
}

/// Phoenix topic for a channel.
fn channel_topic(params: &ChannelParams) -> String {
    format!("realtime:{}", params.topic)
}

/// `https://x.supabase.co` → `wss://x.supabase.co/realtime/v1/websocket?apikey=..&vsn=1.0.0`
fn socket_url(project_url: &Url, api_key: &str) -> RealtimeResult<Url> {
    let scheme = match project_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(RealtimeError::InvalidUrl(format!("unsupported scheme {}", other))),
    };

    let mut url = project_url
        .join("realtime/v1/websocket")
        .map_err(|e| RealtimeError::InvalidUrl(e.to_string()))?;
    url.set_scheme(scheme)
        .map_err(|_| RealtimeError::InvalidUrl(project_url.to_string()))?;
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", api_key)
        .append_pair("vsn", PROTOCOL_VSN);

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url_from_project_url() {
        let project = Url::parse("https://abc.supabase.co").unwrap();
        let url = socket_url(&project, "anon").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        let local = Url::parse("http://127.0.0.1:54321/").unwrap();
        let url = socket_url(&local, "anon").unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.port(), Some(54321));
    }

    #[test]
    fn test_socket_url_rejects_other_schemes() {
        let project = Url::parse("ftp://abc.supabase.co").unwrap();
        assert!(matches!(
            socket_url(&project, "anon"),
            Err(RealtimeError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_handle_frame_routes_by_topic() {
        let topic = "realtime:notifications:user-1";
        let change = r#"{"topic":"realtime:notifications:user-1","event":"postgres_changes","payload":{"data":{"type":"INSERT","commit_timestamp":"t1","record":{"id":"n-1"},"old_record":{}}}}"#;
        assert!(matches!(handle_frame(topic, change), Frame::Event(_)));

        let other = r#"{"topic":"realtime:other","event":"postgres_changes","payload":{}}"#;
        assert!(matches!(handle_frame(topic, other), Frame::Ignored));

        let closed = r#"{"topic":"realtime:notifications:user-1","event":"phx_close","payload":{}}"#;
        assert!(matches!(
            handle_frame(topic, closed),
            Frame::Failed(RealtimeError::ChannelClosed)
        ));

        assert!(matches!(handle_frame(topic, "not json"), Frame::Ignored));
    }
}
