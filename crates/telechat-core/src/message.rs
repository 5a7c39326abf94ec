//! Chat message types.
//!
//! [`ChatMessage`] is what a sender hands to the distributor; [`NewChatRecord`]
//! and [`ChatRecord`] are the shapes handed to and returned by the
//! [`ChatStore`](crate::store::ChatStore).

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Format of the timestamp shown next to every chat line (`Jan  2 15:04:05`).
pub const TIMESTAMP_FORMAT: &str = "%b %e %H:%M:%S";

/// Current local time in [`TIMESTAMP_FORMAT`].
#[must_use]
pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// A message about to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Sender name.
    pub name: String,
    /// Sender-side timestamp, already formatted.
    pub timestamp: String,
    /// Message body.
    pub text: String,
}

impl ChatMessage {
    /// Create a message stamped with the current local time.
    #[must_use]
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp: timestamp_now(),
            text: text.into(),
        }
    }

    /// Replace the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Visible text of a broadcast: `<sender> <timestamp>#: <text>`.
    #[must_use]
    pub fn broadcast_line(&self) -> String {
        format!("{} {}#: {}", self.name, self.timestamp, self.text)
    }

    /// Visible text of a channel message: `Channel: <n> <timestamp>#: <text>`.
    #[must_use]
    pub fn channel_line(&self, channel: u32) -> String {
        format!("Channel: {} {}#: {}", channel, self.timestamp, self.text)
    }

    /// Visible text of a private message:
    /// `Private Message: <sender> <timestamp>#: <text>`.
    #[must_use]
    pub fn private_line(&self) -> String {
        format!(
            "Private Message: {} {}#: {}",
            self.name, self.timestamp, self.text
        )
    }
}

/// How a message was addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Delivered to every listener.
    Broadcast,
    /// Delivered to the subscribers of one channel.
    Channel,
    /// Delivered to one named recipient.
    Pm,
}

impl MessageKind {
    /// Stored name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Channel => "channel",
            Self::Pm => "pm",
        }
    }

    /// Parse a stored kind name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "broadcast" => Some(Self::Broadcast),
            "channel" => Some(Self::Channel),
            "pm" => Some(Self::Pm),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivered message ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChatRecord {
    /// Sender name.
    pub user: String,
    /// Channel number for channel messages.
    pub channel: Option<i64>,
    /// Recipient for private messages.
    pub pm_recipient: Option<String>,
    /// Raw message body (not the formatted line).
    pub message: String,
    /// Addressing kind.
    pub message_type: MessageKind,
}

impl NewChatRecord {
    /// Record for a delivered broadcast.
    #[must_use]
    pub fn broadcast(msg: &ChatMessage) -> Self {
        Self {
            user: msg.name.clone(),
            channel: None,
            pm_recipient: None,
            message: msg.text.clone(),
            message_type: MessageKind::Broadcast,
        }
    }

    /// Record for a delivered channel message.
    #[must_use]
    pub fn channel(msg: &ChatMessage, channel: u32) -> Self {
        Self {
            user: msg.name.clone(),
            channel: Some(i64::from(channel)),
            pm_recipient: None,
            message: msg.text.clone(),
            message_type: MessageKind::Channel,
        }
    }

    /// Record for a delivered private message.
    #[must_use]
    pub fn private(msg: &ChatMessage, recipient: &str) -> Self {
        Self {
            user: msg.name.clone(),
            channel: None,
            pm_recipient: Some(recipient.to_string()),
            message: msg.text.clone(),
            message_type: MessageKind::Pm,
        }
    }
}

/// A persisted chat record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    /// Store-assigned id.
    pub id: i64,
    /// Sender name.
    pub user: String,
    /// Channel number for channel messages.
    pub channel: Option<i64>,
    /// Recipient for private messages.
    pub pm_recipient: Option<String>,
    /// Raw message body.
    pub message: String,
    /// Addressing kind.
    pub message_type: MessageKind,
    /// Insert time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl ChatRecord {
    /// Build a stored record from a new one.
    #[must_use]
    pub fn from_new(id: i64, record: NewChatRecord, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user: record.user,
            channel: record.channel,
            pm_recipient: record.pm_recipient,
            message: record.message,
            message_type: record.message_type,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> ChatMessage {
        ChatMessage::new("alice", "hello").with_timestamp("Jan  2 15:04:05")
    }

    #[test]
    fn test_visible_lines() {
        let msg = message();
        assert_eq!(msg.broadcast_line(), "alice Jan  2 15:04:05#: hello");
        assert_eq!(msg.channel_line(5), "Channel: 5 Jan  2 15:04:05#: hello");
        assert_eq!(
            msg.private_line(),
            "Private Message: alice Jan  2 15:04:05#: hello"
        );
    }

    #[test]
    fn test_records() {
        let msg = message();

        let record = NewChatRecord::broadcast(&msg);
        assert_eq!(record.message_type, MessageKind::Broadcast);
        assert_eq!(record.message, "hello");
        assert!(record.channel.is_none());

        let record = NewChatRecord::channel(&msg, 5);
        assert_eq!(record.channel, Some(5));

        let record = NewChatRecord::private(&msg, "bob");
        assert_eq!(record.pm_recipient.as_deref(), Some("bob"));
        assert_eq!(record.message_type, MessageKind::Pm);
    }

    #[test]
    fn test_message_kind_names() {
        for kind in [MessageKind::Broadcast, MessageKind::Channel, MessageKind::Pm] {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::parse("shout"), None);
        assert_eq!(
            serde_json::to_string(&MessageKind::Pm).unwrap(),
            "\"pm\""
        );
    }

    #[test]
    fn test_timestamp_format() {
        let stamp = timestamp_now();
        // "Jan  2 15:04:05"
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[9..10], ":");
    }
}
