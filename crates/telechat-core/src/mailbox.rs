//! Round-scoped mailboxes.
//!
//! Three concurrent maps hold messages waiting to be observed in the current
//! round. Only the distributor posts and clears entries; listeners read the
//! entries addressed to them and consume their own broadcast entry.

use dashmap::DashMap;
use tracing::trace;

/// A broadcast waiting for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastEntry {
    /// Sender name, checked against the recipient's ignore set.
    pub sender: String,
    /// Sender-side timestamp.
    pub timestamp: String,
    /// Formatted line shown to the recipient.
    pub text: String,
}

/// Broadcast, channel and private mailboxes.
#[derive(Debug, Default)]
pub struct Mailboxes {
    broadcast: DashMap<String, BroadcastEntry>,
    channel: DashMap<u32, String>,
    private: DashMap<String, String>,
}

impl Mailboxes {
    /// Create empty mailboxes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn post_broadcast(&self, recipient: &str, entry: BroadcastEntry) {
        self.broadcast.insert(recipient.to_string(), entry);
    }

    /// Post a channel entry, replacing any pending one for that channel.
    pub(crate) fn post_channel(&self, channel: u32, text: String) {
        self.channel.insert(channel, text);
    }

    pub(crate) fn post_private(&self, recipient: &str, text: String) {
        self.private.insert(recipient.to_string(), text);
    }

    pub(crate) fn clear_channel(&self, channel: u32) {
        self.channel.remove(&channel);
    }

    pub(crate) fn clear_private(&self, recipient: &str) {
        self.private.remove(recipient);
    }

    /// Drop everything addressed to a client that has left.
    pub(crate) fn clear_recipient(&self, name: &str) {
        let broadcast = self.broadcast.remove(name).is_some();
        let private = self.private.remove(name).is_some();
        if broadcast || private {
            trace!(recipient = %name, "Cleared pending mail");
        }
    }

    /// The broadcast entry waiting for a recipient.
    #[must_use]
    pub fn broadcast_for(&self, name: &str) -> Option<BroadcastEntry> {
        self.broadcast.get(name).map(|e| e.value().clone())
    }

    /// Consume the broadcast entry waiting for a recipient.
    pub fn take_broadcast(&self, name: &str) -> Option<BroadcastEntry> {
        self.broadcast.remove(name).map(|(_, entry)| entry)
    }

    /// The pending entry for a channel.
    #[must_use]
    pub fn channel(&self, channel: u32) -> Option<String> {
        self.channel.get(&channel).map(|e| e.value().clone())
    }

    /// The private entry waiting for a recipient.
    #[must_use]
    pub fn private_for(&self, name: &str) -> Option<String> {
        self.private.get(name).map(|e| e.value().clone())
    }

    /// Pending broadcast entries.
    #[must_use]
    pub fn broadcast_len(&self) -> usize {
        self.broadcast.len()
    }

    /// Check if no entry of any kind is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.broadcast.is_empty() && self.channel.is_empty() && self.private.is_empty()
    }
}
