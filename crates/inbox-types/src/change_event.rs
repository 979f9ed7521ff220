//! Realtime change-feed payloads.
//!
//! The change feed delivers `{event_type, new, old, commit_timestamp}` for every
//! INSERT/UPDATE/DELETE on the user's rows. `new` is empty on DELETE, and `old`
//! usually only carries the primary key unless the table uses full replica
//! identity, so consumers must not rely on it for anything but the id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::Notification;

/// Fields a record must carry before it can be merged into the inbox.
const REQUIRED_FIELDS: [&str; 3] = ["id", "user_id", "type"];

/// Change kind reported by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEventType {
    Insert,
    Update,
    Delete,
}

impl ChangeEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Why a change payload could not be used.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload has no record")]
    MissingRecord,

    #[error("payload is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("payload record is invalid: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// A single change event for the `notifications` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_type: ChangeEventType,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
    pub commit_timestamp: String,
}

impl ChangeEvent {
    /// The new row image, if the feed sent a non-empty one.
    pub fn record(&self) -> Option<&Value> {
        non_empty(self.new.as_ref())
    }

    /// The old row image, if the feed sent a non-empty one.
    pub fn old_record(&self) -> Option<&Value> {
        non_empty(self.old.as_ref())
    }

    /// Id of the affected notification, taken from whichever image has it.
    pub fn notification_id(&self) -> Option<&str> {
        self.record()
            .and_then(|r| r.get("id"))
            .and_then(Value::as_str)
            .or_else(|| {
                self.old_record()
                    .and_then(|r| r.get("id"))
                    .and_then(Value::as_str)
            })
    }

    /// Dedup key: `kind:notification_id:commit_timestamp`.
    pub fn event_id(&self) -> Option<String> {
        self.notification_id().map(|id| {
            format!(
                "{}:{}:{}",
                self.event_type.as_str(),
                id,
                self.commit_timestamp
            )
        })
    }

    /// Parse and validate the new row image.
    pub fn parse_record(&self) -> Result<Notification, PayloadError> {
        let record = self.record().ok_or(PayloadError::MissingRecord)?;
        validate_required(record)?;
        Ok(serde_json::from_value(record.clone())?)
    }

    /// Read state carried by the old image, when the table sends full rows.
    pub fn old_is_read(&self) -> Option<bool> {
        self.old_record()
            .and_then(|r| r.get("is_read"))
            .and_then(Value::as_bool)
    }
}

fn non_empty(value: Option<&Value>) -> Option<&Value> {
    match value {
        Some(Value::Object(map)) if !map.is_empty() => value,
        _ => None,
    }
}

fn validate_required(record: &Value) -> Result<(), PayloadError> {
    for field in REQUIRED_FIELDS {
        match record.get(field) {
            Some(Value::Null) | None => return Err(PayloadError::MissingField(field)),
            Some(Value::String(s)) if s.is_empty() => {
                return Err(PayloadError::MissingField(field))
            }
            Some(_) => {}
        }
    }
    Ok(())
}
