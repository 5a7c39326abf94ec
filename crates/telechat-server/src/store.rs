//! SQLite chat history.
//!
//! rusqlite is synchronous, so the connection sits behind a mutex and every
//! call runs on the blocking pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use rusqlite_migration::{Migrations, M};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use telechat_core::{ChatRecord, ChatStore, HistoryQuery, MessageKind, NewChatRecord, StoreError};
use tracing::info;

/// Schema migrations, tracked through SQLite's `user_version`.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "CREATE TABLE chat (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user TEXT NOT NULL,
    channel INTEGER,
    pm_recipient TEXT,
    message TEXT NOT NULL,
    message_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX idx_chat_user ON chat(user);
CREATE INDEX idx_chat_channel ON chat(channel);",
    )])
}

const SELECT_COLUMNS: &str =
    "SELECT id, user, channel, pm_recipient, message, message_type, created_at, updated_at FROM chat";

/// Chat store backed by a SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and migrate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(db_error)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_error)?;

        let store = Self::init(conn)?;
        info!(path = %path.display(), "Chat database ready");
        Ok(store)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(db_error)?)
    }

    fn init(mut conn: Connection) -> Result<Self, StoreError> {
        migrations()
            .to_latest(&mut conn)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&*conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn db_error(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn parse_time(index: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRecord> {
    let kind: String = row.get(5)?;
    let message_type = MessageKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown message type {kind:?}").into(),
        )
    })?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;

    Ok(ChatRecord {
        id: row.get(0)?,
        user: row.get(1)?,
        channel: row.get(2)?,
        pm_recipient: row.get(3)?,
        message: row.get(4)?,
        message_type,
        created_at: parse_time(6, &created_at)?,
        updated_at: parse_time(7, &updated_at)?,
    })
}

/// Build the filtered history statement and its parameters.
fn history_sql(query: &HistoryQuery) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(id) = query.id {
        clauses.push("id = ?");
        values.push(Value::Integer(id));
    } else {
        if let Some(user) = &query.user {
            clauses.push("user = ?");
            values.push(Value::Text(user.clone()));
        }
        if let Some(channel) = query.channel {
            clauses.push("channel = ?");
            values.push(Value::Integer(channel));
        }
        if let Some(message) = &query.message {
            clauses.push("message = ?");
            values.push(Value::Text(message.clone()));
        }
        if let Some(recipient) = &query.recipient {
            clauses.push("pm_recipient = ?");
            values.push(Value::Text(recipient.clone()));
        }
        if let Some(kind) = query.message_type {
            clauses.push("message_type = ?");
            values.push(Value::Text(kind.as_str().to_string()));
        }
    }

    let mut sql = SELECT_COLUMNS.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY id ASC LIMIT ?");
    values.push(Value::Integer(query.effective_limit() as i64));

    (sql, values)
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn save(&self, record: NewChatRecord) -> Result<ChatRecord, StoreError> {
        self.blocking(move |conn| {
            let now = Utc::now();
            let stamp = now.to_rfc3339();
            conn.execute(
                "INSERT INTO chat (user, channel, pm_recipient, message, message_type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.user,
                    record.channel,
                    record.pm_recipient,
                    record.message,
                    record.message_type.as_str(),
                    stamp,
                    stamp,
                ],
            )
            .map_err(db_error)?;

            Ok(ChatRecord::from_new(conn.last_insert_rowid(), record, now))
        })
        .await
    }

    async fn history(&self, query: &HistoryQuery) -> Result<Vec<ChatRecord>, StoreError> {
        let (sql, values) = history_sql(query);
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(db_error)?;
            let rows = stmt
                .query_map(params_from_iter(values), record_from_row)
                .map_err(db_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_error)
        })
        .await
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telechat_core::ChatMessage;

    fn msg(name: &str, text: &str) -> ChatMessage {
        ChatMessage::new(name, text)
    }

    #[test]
    fn test_migrations_are_valid() {
        assert!(migrations().validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_read_back() {
        let store = SqliteStore::open_in_memory().unwrap();

        let saved = store
            .save(NewChatRecord::channel(&msg("alice", "hi"), 5))
            .await
            .unwrap();
        assert_eq!(saved.id, 1);

        let records = store.history(&HistoryQuery::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user, "alice");
        assert_eq!(records[0].channel, Some(5));
        assert_eq!(records[0].message_type, MessageKind::Channel);
        assert_eq!(records[0].pm_recipient, None);
    }

    #[tokio::test]
    async fn test_history_filters() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save(NewChatRecord::broadcast(&msg("alice", "hello")))
            .await
            .unwrap();
        store
            .save(NewChatRecord::private(&msg("alice", "secret"), "bob"))
            .await
            .unwrap();
        store
            .save(NewChatRecord::broadcast(&msg("bob", "hey")))
            .await
            .unwrap();

        let query = HistoryQuery {
            user: Some("alice".to_string()),
            ..Default::default()
        };
        let records = store.history(&query).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].id < records[1].id);

        let query = HistoryQuery {
            recipient: Some("bob".to_string()),
            message_type: Some(MessageKind::Pm),
            ..Default::default()
        };
        let records = store.history(&query).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "secret");

        let query = HistoryQuery {
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(store.history(&query).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_id_short_circuits() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save(NewChatRecord::broadcast(&msg("alice", "hello")))
            .await
            .unwrap();

        let query = HistoryQuery {
            id: Some(1),
            user: Some("nobody".to_string()),
            ..Default::default()
        };
        assert_eq!(store.history(&query).await.unwrap().len(), 1);
    }

    #[test]
    fn test_history_sql_is_parameterized() {
        let query = HistoryQuery {
            user: Some("x' OR '1'='1".to_string()),
            ..Default::default()
        };
        let (sql, values) = history_sql(&query);
        assert!(sql.ends_with("WHERE user = ? ORDER BY id ASC LIMIT ?"));
        assert_eq!(values.len(), 2);
    }
}
