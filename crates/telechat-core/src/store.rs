//! Chat history storage.
//!
//! The distributor hands every delivered message to a [`ChatStore`] once the
//! round that delivered it has finished. Storage is fire-and-forget from the
//! chat's point of view: a failed save is logged and never undoes delivery.

use crate::message::{ChatRecord, MessageKind, NewChatRecord};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

/// Default and maximum number of records returned by a history query.
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected the operation.
    #[error("Database error: {0}")]
    Database(String),

    /// The schema could not be brought up to date.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// The blocking storage task failed.
    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Filters for reading chat history.
///
/// Every field that is set must match exactly. When `id` is set the other
/// filters are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Record id.
    pub id: Option<i64>,
    /// Sender name.
    pub user: Option<String>,
    /// Channel number.
    pub channel: Option<i64>,
    /// Message body.
    pub message: Option<String>,
    /// Private message recipient.
    pub recipient: Option<String>,
    /// Addressing kind.
    pub message_type: Option<MessageKind>,
    /// Maximum number of records, capped at [`MAX_HISTORY_LIMIT`].
    pub limit: Option<usize>,
}

impl HistoryQuery {
    /// Effective row limit.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(MAX_HISTORY_LIMIT)
            .min(MAX_HISTORY_LIMIT)
    }

    /// Check whether a record passes the filters.
    #[must_use]
    pub fn matches(&self, record: &ChatRecord) -> bool {
        if let Some(id) = self.id {
            return record.id == id;
        }

        self.user.as_ref().map_or(true, |u| *u == record.user)
            && self.channel.map_or(true, |c| record.channel == Some(c))
            && self.message.as_ref().map_or(true, |m| *m == record.message)
            && self
                .recipient
                .as_ref()
                .map_or(true, |r| record.pm_recipient.as_ref() == Some(r))
            && self
                .message_type
                .map_or(true, |t| record.message_type == t)
    }
}

/// Persistence collaborator for delivered messages.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist a delivered message and return the stored record.
    async fn save(&self, record: NewChatRecord) -> Result<ChatRecord, StoreError>;

    /// Read stored records matching the query, oldest first.
    async fn history(&self, query: &HistoryQuery) -> Result<Vec<ChatRecord>, StoreError>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// In-process store, used when no database is configured.
#[derive(Debug)]
pub struct MemoryStore {
    records: DashMap<i64, ChatRecord>,
    next_id: AtomicI64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn save(&self, record: NewChatRecord) -> Result<ChatRecord, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stored = ChatRecord::from_new(id, record, Utc::now());
        self.records.insert(id, stored.clone());
        Ok(stored)
    }

    async fn history(&self, query: &HistoryQuery) -> Result<Vec<ChatRecord>, StoreError> {
        let mut records: Vec<ChatRecord> = self
            .records
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        records.sort_by_key(|r| r.id);
        records.truncate(query.effective_limit());
        Ok(records)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatMessage;

    #[tokio::test]
    async fn test_memory_store_save_assigns_ids() {
        let store = MemoryStore::new();
        let msg = ChatMessage::new("alice", "hello");

        let first = store.save(NewChatRecord::broadcast(&msg)).await.unwrap();
        let second = store.save(NewChatRecord::channel(&msg, 5)).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(second.channel, Some(5));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_history_filters() {
        let store = MemoryStore::new();
        let alice = ChatMessage::new("alice", "hello");
        let bob = ChatMessage::new("bob", "hey");

        store.save(NewChatRecord::broadcast(&alice)).await.unwrap();
        store.save(NewChatRecord::private(&bob, "alice")).await.unwrap();
        store.save(NewChatRecord::channel(&alice, 5)).await.unwrap();

        let all = store.history(&HistoryQuery::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));

        let query = HistoryQuery {
            user: Some("alice".to_string()),
            ..Default::default()
        };
        assert_eq!(store.history(&query).await.unwrap().len(), 2);

        let query = HistoryQuery {
            recipient: Some("alice".to_string()),
            ..Default::default()
        };
        let pms = store.history(&query).await.unwrap();
        assert_eq!(pms.len(), 1);
        assert_eq!(pms[0].user, "bob");

        let query = HistoryQuery {
            message_type: Some(MessageKind::Channel),
            channel: Some(5),
            ..Default::default()
        };
        assert_eq!(store.history(&query).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_id_filter_ignores_other_filters() {
        let store = MemoryStore::new();
        let msg = ChatMessage::new("alice", "hello");
        store.save(NewChatRecord::broadcast(&msg)).await.unwrap();

        let query = HistoryQuery {
            id: Some(1),
            user: Some("nobody".to_string()),
            ..Default::default()
        };
        assert_eq!(store.history(&query).await.unwrap().len(), 1);
    }

    #[test]
    fn test_limit_is_capped() {
        let query = HistoryQuery {
            limit: Some(5000),
            ..Default::default()
        };
        assert_eq!(query.effective_limit(), MAX_HISTORY_LIMIT);

        let query = HistoryQuery {
            limit: Some(3),
            ..Default::default()
        };
        assert_eq!(query.effective_limit(), 3);
    }
}
