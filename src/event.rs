//! Event and subscription types.
//!
//! An `Event` is the typed form of one database notification. The payload is
//! kept as the exact string the server delivered; `Event::change` parses the
//! trigger payload convention for handlers that want structured access.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::ChannelName;
use crate::error::HandlerError;

/// A notification as delivered by a `NotificationSource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    /// Backend process id of the sender.
    pub origin_id: u32,
    /// Channel the notification was sent on.
    pub channel: String,
    /// Payload string, untouched.
    pub payload: String,
}

impl RawNotification {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(origin_id: u32, channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            origin_id,
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// One received notification.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub origin_id: u32,
    pub channel: String,
    pub payload: String,
}

impl Event {
    /// Parses the payload as a trigger change record.
    ///
    /// # Errors
    /// `HandlerError::Payload` if the payload is not a JSON change record.
    pub fn change(&self) -> Result<ChangePayload, HandlerError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

impl From<RawNotification> for Event {
    fn from(raw: RawNotification) -> Self {
        Self {
            origin_id: raw.origin_id,
            channel: raw.channel,
            payload: raw.payload,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "origin={} channel={} payload={}",
            self.origin_id, self.channel, self.payload
        )
    }
}

/// Row operation that fired the trigger.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        })
    }
}

/// Payload emitted by the installed `notify_event()` trigger function.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    pub table: String,
    pub action: ChangeAction,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Unique identifier for a subscription.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The binding of one connection to one channel.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub channel: ChannelName,
    pub opened_at: DateTime<Utc>,
}

impl Subscription {
    pub(crate) fn new(channel: ChannelName) -> Self {
        Self {
            id: SubscriptionId::new(),
            channel,
            opened_at: Utc::now(),
        }
    }
}
