//! Phoenix channel frames used by the Supabase realtime endpoint.

use crate::{RealtimeError, RealtimeResult};
use inbox_types::{ChangeEvent, ChangeEventType};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";
pub const EVENT_SYSTEM: &str = "system";

/// Topic the heartbeat is sent on.
pub const HEARTBEAT_TOPIC: &str = "phoenix";

/// A single frame on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// Outcome of a `phx_reply`.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    Error(String),
}

impl PhoenixMessage {
    /// Join a `postgres_changes` channel on the `notifications` table for one user.
    pub fn join(topic: &str, filter: &str, access_token: &str, reference: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "*",
                        "schema": "public",
                        "table": "notifications",
                        "filter": filter,
                    }],
                },
                "access_token": access_token,
            }),
            reference: Some(reference.to_string()),
            join_ref: Some(reference.to_string()),
        }
    }

    pub fn leave(topic: &str, reference: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }

    pub fn heartbeat(reference: &str) -> Self {
        Self {
            topic: HEARTBEAT_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }

    pub fn to_json(&self) -> RealtimeResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> RealtimeResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Status of a `phx_reply`; `None` for any other event.
    pub fn reply(&self) -> Option<Reply> {
        if self.event != EVENT_REPLY {
            return None;
        }
        match self.payload.get("status").and_then(Value::as_str) {
            Some("ok") => Some(Reply::Ok),
            _ => Some(Reply::Error(reason(&self.payload["response"]))),
        }
    }

    /// Error reported by a `system` frame (e.g. the postgres_changes binding failed).
    pub fn system_error(&self) -> Option<String> {
        if self.event != EVENT_SYSTEM {
            return None;
        }
        match self.payload.get("status").and_then(Value::as_str) {
            Some("error") => Some(reason(&self.payload)),
            _ => None,
        }
    }

    /// Decode a `postgres_changes` frame into a change event.
    pub fn change_event(&self) -> RealtimeResult<ChangeEvent> {
        let data = self
            .payload
            .get("data")
            .cloned()
            .ok_or_else(|| RealtimeError::Channel("postgres_changes frame without data".into()))?;
        let data: PostgresChangeData = serde_json::from_value(data)?;
        Ok(data.into())
    }
}

/// `payload.data` of a `postgres_changes` frame.
#[derive(Debug, Deserialize)]
struct PostgresChangeData {
    #[serde(rename = "type")]
    change_type: ChangeEventType,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
    commit_timestamp: String,
}

impl From<PostgresChangeData> for ChangeEvent {
    fn from(data: PostgresChangeData) -> Self {
        ChangeEvent {
            event_type: data.change_type,
            new: data.record,
            old: data.old_record,
            commit_timestamp: data.commit_timestamp,
        }
    }
}

fn reason(value: &Value) -> String {
    ["reason", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}
