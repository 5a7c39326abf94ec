//! Message distribution.
//!
//! The distributor is the only writer of the mailboxes. Each publish stages
//! entries, runs one round over the listeners registered at that moment,
//! clears what the round was meant to deliver and hands a record to the
//! store.

use crate::listener::Listener;
use crate::mailbox::{BroadcastEntry, Mailboxes};
use crate::message::{ChatMessage, NewChatRecord};
use crate::registry::{Registry, RegistryError, RegistrySnapshot};
use crate::round::{RoundController, RoundId};
use crate::store::{ChatStore, MemoryStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// What a listener does with a broadcast from a peer it ignores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IgnoredBroadcastPolicy {
    /// Delete the entry without showing it.
    #[default]
    Consume,
    /// Leave the entry pending; it is filtered again on later rounds and
    /// shown if the sender is unignored before it is replaced.
    Retain,
}

/// Distributor configuration.
#[derive(Debug, Clone, Default)]
pub struct DistributorConfig {
    /// Handling of ignored broadcasts.
    pub ignored_broadcasts: IgnoredBroadcastPolicy,
}

/// Distribution errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DistributionError {
    /// Nobody but the pseudo client is registered, or nobody is listening.
    #[error("No listeners to deliver to")]
    NoListeners,
}

/// Result of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundReport {
    /// Round number.
    pub round: RoundId,
    /// Listeners that took part.
    pub listeners: usize,
}

/// Publishes messages through lock-step rounds.
pub struct Distributor {
    registry: Arc<Registry>,
    mailboxes: Arc<Mailboxes>,
    rounds: RoundController,
    store: Arc<dyn ChatStore>,
    config: DistributorConfig,
}

impl Distributor {
    /// Create a distributor with default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self::with_config(store, DistributorConfig::default())
    }

    /// Create a distributor with custom configuration.
    #[must_use]
    pub fn with_config(store: Arc<dyn ChatStore>, config: DistributorConfig) -> Self {
        info!(
            store = store.name(),
            ignored_broadcasts = ?config.ignored_broadcasts,
            "Creating distributor"
        );
        Self {
            registry: Arc::new(Registry::new()),
            mailboxes: Arc::new(Mailboxes::new()),
            rounds: RoundController::new(),
            store,
            config,
        }
    }

    /// Distributor backed by an in-process store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// The client registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Pending mailbox entries.
    #[must_use]
    pub fn mailboxes(&self) -> &Mailboxes {
        &self.mailboxes
    }

    /// The chat store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    /// Register a client that never listens.
    ///
    /// # Errors
    ///
    /// Fails if the name is invalid or taken.
    pub fn register_pseudo(&self, name: &str) -> Result<(), RegistryError> {
        self.registry.add_pseudo(name)?;
        info!(client = %name, "Registered pseudo client");
        Ok(())
    }

    /// Register a listening client and build its listener.
    ///
    /// # Errors
    ///
    /// Fails if the name is invalid or taken.
    pub fn join(&self, name: &str) -> Result<Listener, RegistryError> {
        let rounds = self.registry.join(name)?;
        Ok(Listener::new(
            name,
            Arc::clone(&self.registry),
            Arc::clone(&self.mailboxes),
            rounds,
            self.config.ignored_broadcasts,
        ))
    }

    /// Remove a client and drop the mail addressed to it.
    ///
    /// Returns `true` if the client was registered.
    pub fn leave(&self, name: &str) -> bool {
        let removed = self.registry.remove(name);
        if removed {
            self.mailboxes.clear_recipient(name);
        }
        removed
    }

    /// Deliver a message to every listener that does not ignore the sender.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::NoListeners`] if there is nobody to
    /// deliver to. Nothing is staged or persisted in that case.
    pub async fn publish_broadcast(
        &self,
        msg: &ChatMessage,
    ) -> Result<RoundReport, DistributionError> {
        let mut round = self.rounds.begin().await;
        let snapshot = self.eligible_snapshot()?;

        // Every registered client gets an entry. Non-listening clients never
        // consume theirs, so those are cleared once the round is over.
        let idle = snapshot.non_listening();
        let text = msg.broadcast_line();
        for name in &snapshot.names {
            self.mailboxes.post_broadcast(
                name,
                BroadcastEntry {
                    sender: msg.name.clone(),
                    timestamp: msg.timestamp.clone(),
                    text: text.clone(),
                },
            );
        }

        let outcome = round.run(snapshot.participants).await;
        for name in &idle {
            self.mailboxes.take_broadcast(name);
        }
        drop(round);
        let report = self.report(outcome.round, outcome.started)?;

        info!(user = %msg.name, message = %msg.text, round = report.round, "BROADCAST");
        self.persist(NewChatRecord::broadcast(msg)).await;
        Ok(report)
    }

    /// Deliver a message to the subscribers of a channel.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::NoListeners`] if there is nobody to
    /// deliver to.
    pub async fn publish_channel(
        &self,
        msg: &ChatMessage,
        channel: u32,
    ) -> Result<RoundReport, DistributionError> {
        let mut round = self.rounds.begin().await;
        let snapshot = self.eligible_snapshot()?;

        self.mailboxes.post_channel(channel, msg.channel_line(channel));
        let outcome = round.run(snapshot.participants).await;
        self.mailboxes.clear_channel(channel);
        drop(round);
        let report = self.report(outcome.round, outcome.started)?;

        info!(user = %msg.name, channel, message = %msg.text, round = report.round, "CHANNEL");
        self.persist(NewChatRecord::channel(msg, channel)).await;
        Ok(report)
    }

    /// Deliver a message to one named recipient.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::NoListeners`] if there is nobody to
    /// deliver to.
    pub async fn publish_private(
        &self,
        msg: &ChatMessage,
        recipient: &str,
    ) -> Result<RoundReport, DistributionError> {
        let mut round = self.rounds.begin().await;
        let snapshot = self.eligible_snapshot()?;

        self.mailboxes.post_private(recipient, msg.private_line());
        let outcome = round.run(snapshot.participants).await;
        self.mailboxes.clear_private(recipient);
        drop(round);
        let report = self.report(outcome.round, outcome.started)?;

        info!(user = %msg.name, recipient = %recipient, message = %msg.text, round = report.round, "PRIVATE");
        self.persist(NewChatRecord::private(msg, recipient)).await;
        Ok(report)
    }

    /// Snapshot the registry, refusing rounds nobody would observe.
    fn eligible_snapshot(&self) -> Result<RegistrySnapshot, DistributionError> {
        let snapshot = self.registry.snapshot();
        if snapshot.total() <= 1 || snapshot.participants.is_empty() {
            warn!(
                registered = snapshot.total(),
                listeners = snapshot.participants.len(),
                "Publish with no listeners"
            );
            return Err(DistributionError::NoListeners);
        }
        Ok(snapshot)
    }

    /// Every listener in the snapshot vanished before the round started.
    fn report(&self, round: RoundId, started: usize) -> Result<RoundReport, DistributionError> {
        if started == 0 {
            warn!(round, "No listener took part in the round");
            return Err(DistributionError::NoListeners);
        }
        Ok(RoundReport {
            round,
            listeners: started,
        })
    }

    async fn persist(&self, record: NewChatRecord) {
        let kind = record.message_type;
        match self.store.save(record).await {
            Ok(stored) => debug!(id = stored.id, kind = %kind, "Persisted message"),
            Err(e) => warn!(kind = %kind, error = %e, store = self.store.name(), "Failed to persist message"),
        }
    }
}

impl std::fmt::Debug for Distributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distributor")
            .field("registry", &self.registry)
            .field("store", &self.store.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ignore;
    use crate::message::MessageKind;
    use crate::registry::WEB_CLIENT_NAME;
    use crate::store::HistoryQuery;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::sync::Mutex;

    struct Client {
        name: String,
        reader: DuplexStream,
        ignores: ignore::SharedIgnoreSet,
    }

    impl Client {
        /// Read whatever arrives within a short window.
        async fn drain(&mut self) -> String {
            let mut out = Vec::new();
            let mut buf = [0u8; 1024];
            while let Ok(Ok(n)) =
                tokio::time::timeout(Duration::from_millis(50), self.reader.read(&mut buf)).await
            {
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            String::from_utf8(out).unwrap()
        }
    }

    fn connect(distributor: &Distributor, name: &str) -> Client {
        let listener = distributor.join(name).unwrap();
        let ignores = listener.ignores();
        let (reader, writer) = tokio::io::duplex(4096);
        tokio::spawn(listener.run(Arc::new(Mutex::new(writer))));
        Client {
            name: name.to_string(),
            reader,
            ignores,
        }
    }

    fn setup(policy: IgnoredBroadcastPolicy) -> (Arc<MemoryStore>, Distributor) {
        let store = Arc::new(MemoryStore::new());
        let distributor = Distributor::with_config(
            store.clone(),
            DistributorConfig {
                ignored_broadcasts: policy,
            },
        );
        distributor.register_pseudo(WEB_CLIENT_NAME).unwrap();
        (store, distributor)
    }

    fn msg(name: &str, text: &str) -> ChatMessage {
        ChatMessage::new(name, text).with_timestamp("Jan  2 15:04:05")
    }

    #[tokio::test]
    async fn test_pseudo_client_alone_fails() {
        let (store, distributor) = setup(IgnoredBroadcastPolicy::Consume);

        let err = distributor
            .publish_broadcast(&msg(WEB_CLIENT_NAME, "anyone?"))
            .await
            .unwrap_err();
        assert_eq!(err, DistributionError::NoListeners);
        assert_eq!(
            distributor.publish_channel(&msg("web", "x"), 1).await,
            Err(DistributionError::NoListeners)
        );
        assert!(distributor.mailboxes().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let (store, distributor) = setup(IgnoredBroadcastPolicy::Consume);
        let mut alice = connect(&distributor, "alice");
        let mut bob = connect(&distributor, "bob");

        let report = distributor
            .publish_broadcast(&msg("alice", "hello"))
            .await
            .unwrap();
        assert_eq!(report.listeners, 2);

        let line = "alice Jan  2 15:04:05#: hello";
        assert_eq!(bob.drain().await, format!("\r\n{line}\r\nbob#: "));
        assert_eq!(alice.drain().await, format!("\r\n{line}\r\nalice#: "));

        // Nothing outlives the round, the pseudo client's entry included.
        assert!(distributor.mailboxes().broadcast_for(WEB_CLIENT_NAME).is_none());
        assert!(distributor.mailboxes().is_empty());

        let records = store.history(&HistoryQuery::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user, "alice");
        assert_eq!(records[0].message, "hello");
        assert_eq!(records[0].message_type, MessageKind::Broadcast);
    }

    #[tokio::test]
    async fn test_channel_reaches_subscribers_only() {
        let (store, distributor) = setup(IgnoredBroadcastPolicy::Consume);
        let mut alice = connect(&distributor, "alice");
        let mut bob = connect(&distributor, "bob");
        distributor.registry().subscribe("bob", 5).unwrap();

        distributor.publish_channel(&msg("alice", "hi"), 5).await.unwrap();

        assert!(bob.drain().await.contains("Channel: 5 Jan  2 15:04:05#: hi"));
        assert_eq!(alice.drain().await, "");
        assert!(distributor.mailboxes().is_empty());

        let records = store.history(&HistoryQuery::default()).await.unwrap();
        assert_eq!(records[0].channel, Some(5));
    }

    #[tokio::test]
    async fn test_private_reaches_recipient_only() {
        let (store, distributor) = setup(IgnoredBroadcastPolicy::Consume);
        let mut alice = connect(&distributor, "alice");
        let mut bob = connect(&distributor, "bob");
        let mut carol = connect(&distributor, "carol");

        distributor
            .publish_private(&msg("alice", "secret"), "bob")
            .await
            .unwrap();

        assert!(bob
            .drain()
            .await
            .contains("Private Message: alice Jan  2 15:04:05#: secret"));
        assert_eq!(alice.drain().await, "");
        assert_eq!(carol.drain().await, "");

        let records = store.history(&HistoryQuery::default()).await.unwrap();
        assert_eq!(records[0].pm_recipient.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_ignore_and_unignore() {
        let (_store, distributor) = setup(IgnoredBroadcastPolicy::Consume);
        let mut alice = connect(&distributor, "alice");
        let mut bob = connect(&distributor, "bob");

        ignore::lock(&alice.ignores).ignore(&bob.name);
        distributor.publish_broadcast(&msg("bob", "hey")).await.unwrap();
        assert_eq!(alice.drain().await, "");
        assert!(bob.drain().await.contains("hey"));

        // Resetting is idempotent.
        ignore::lock(&alice.ignores).reset();
        ignore::lock(&alice.ignores).reset();
        distributor.publish_broadcast(&msg("bob", "again")).await.unwrap();
        assert!(alice.drain().await.contains("bob Jan  2 15:04:05#: again"));
    }

    #[tokio::test]
    async fn test_retain_policy_redelivers_after_unignore() {
        let (_store, distributor) = setup(IgnoredBroadcastPolicy::Retain);
        let mut alice = connect(&distributor, "alice");
        let _bob = connect(&distributor, "bob");
        distributor.registry().subscribe("bob", 1).unwrap();

        ignore::lock(&alice.ignores).ignore("bob");
        distributor.publish_broadcast(&msg("bob", "hey")).await.unwrap();
        assert_eq!(alice.drain().await, "");
        assert!(distributor.mailboxes().broadcast_for("alice").is_some());

        // The next unrelated round shows the pending entry.
        ignore::lock(&alice.ignores).reset();
        distributor.publish_channel(&msg("bob", "ping"), 1).await.unwrap();
        assert!(alice.drain().await.contains("bob Jan  2 15:04:05#: hey"));
    }

    #[tokio::test]
    async fn test_leave_clears_mail() {
        let (_store, distributor) = setup(IgnoredBroadcastPolicy::Consume);
        let _alice = connect(&distributor, "alice");
        let bob = connect(&distributor, "bob");

        assert!(distributor.leave(&bob.name));
        assert!(!distributor.leave(&bob.name));

        // Alice and the pseudo client remain, so the round still runs.
        let report = distributor
            .publish_broadcast(&msg("alice", "anyone?"))
            .await
            .unwrap();
        assert_eq!(report.listeners, 1);
        assert!(distributor.mailboxes().broadcast_for("bob").is_none());
    }

    #[tokio::test]
    async fn test_round_size_fixed_at_snapshot() {
        let (_store, distributor) = setup(IgnoredBroadcastPolicy::Consume);
        let distributor = Arc::new(distributor);
        let _alice = connect(&distributor, "alice");
        let mut held = distributor.registry().join("held").unwrap();

        let publisher = {
            let distributor = Arc::clone(&distributor);
            tokio::spawn(async move { distributor.publish_broadcast(&msg("alice", "hi")).await })
        };

        // The round is open while "held" keeps its token.
        let token = held.recv().await.unwrap();
        let mut late = distributor.registry().join("late").unwrap();
        assert!(distributor.leave("alice"));

        let finished = tokio::spawn(token.finish());
        let report = publisher.await.unwrap().unwrap();

        assert_eq!(report.listeners, 2);
        assert!(finished.await.unwrap());
        assert!(late.try_recv().is_err());
        assert!(distributor.mailboxes().broadcast_for("late").is_none());
    }

    #[tokio::test]
    async fn test_rounds_are_numbered() {
        let (_store, distributor) = setup(IgnoredBroadcastPolicy::Consume);
        let _alice = connect(&distributor, "alice");

        let first = distributor.publish_broadcast(&msg("alice", "1")).await.unwrap();
        let second = distributor.publish_broadcast(&msg("alice", "2")).await.unwrap();
        assert_eq!(second.round, first.round + 1);
    }
}
