//! Per-connection mailbox listener.
//!
//! A listener waits for round tokens. On each token it collects whatever the
//! mailboxes hold for its client, writes it to the connection, acknowledges
//! the round and waits to be released. It ends when its client leaves the
//! registry and the last round holding its start sender has finished.

use crate::distributor::IgnoredBroadcastPolicy;
use crate::ignore::{self, IgnoreSet, SharedIgnoreSet};
use crate::mailbox::Mailboxes;
use crate::registry::Registry;
use crate::round::StartReceiver;
use std::sync::Arc;
use telechat_protocol::delivery;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Round participant bound to one client.
#[derive(Debug)]
pub struct Listener {
    name: String,
    registry: Arc<Registry>,
    mailboxes: Arc<Mailboxes>,
    ignores: SharedIgnoreSet,
    rounds: StartReceiver,
    policy: IgnoredBroadcastPolicy,
}

impl Listener {
    pub(crate) fn new(
        name: &str,
        registry: Arc<Registry>,
        mailboxes: Arc<Mailboxes>,
        rounds: StartReceiver,
        policy: IgnoredBroadcastPolicy,
    ) -> Self {
        Self {
            name: name.to_string(),
            registry,
            mailboxes,
            ignores: IgnoreSet::shared(),
            rounds,
            policy,
        }
    }

    /// Client name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ignore set, shared with the session that handles `/ignore`.
    #[must_use]
    pub fn ignores(&self) -> SharedIgnoreSet {
        Arc::clone(&self.ignores)
    }

    /// Collect the lines addressed to this client in the current round.
    pub fn collect(&self) -> Vec<String> {
        let mut lines = Vec::new();

        if let Some(text) = self.collect_broadcast() {
            lines.push(text);
        }

        for channel in self.registry.channels_of(&self.name) {
            if let Some(text) = self.mailboxes.channel(channel) {
                lines.push(text);
            }
        }

        if let Some(text) = self.mailboxes.private_for(&self.name) {
            lines.push(text);
        }

        lines
    }

    fn collect_broadcast(&self) -> Option<String> {
        let mut ignores = ignore::lock(&self.ignores);
        let version = self.registry.version();
        if ignores.is_stale(version) {
            let (version, names) = self.registry.membership();
            ignores.rebuild(names, version);
            trace!(listener = %self.name, version, "Rebuilt ignore set");
        }

        let entry = match self.policy {
            IgnoredBroadcastPolicy::Consume => self.mailboxes.take_broadcast(&self.name)?,
            IgnoredBroadcastPolicy::Retain => {
                let pending = self.mailboxes.broadcast_for(&self.name)?;
                if !ignores.delivers(&pending.sender) {
                    return None;
                }
                self.mailboxes.take_broadcast(&self.name)?
            }
        };

        if ignores.delivers(&entry.sender) {
            Some(entry.text)
        } else {
            trace!(listener = %self.name, sender = %entry.sender, "Dropped ignored broadcast");
            None
        }
    }

    /// Take part in rounds until the client leaves, writing deliveries to
    /// `writer`.
    ///
    /// A write failure ends the listener after it acknowledges the current
    /// round; later rounds skip it.
    pub async fn run<W>(mut self, writer: Arc<Mutex<W>>)
    where
        W: AsyncWrite + Unpin + Send,
    {
        while let Some(token) = self.rounds.recv().await {
            let round = token.round();
            let lines = self.collect();

            let written = if lines.is_empty() {
                Ok(())
            } else {
                let mut writer = writer.lock().await;
                write_lines(&mut *writer, &lines, &self.name).await
            };

            token.finish().await;

            if let Err(e) = written {
                debug!(listener = %self.name, round, error = %e, "Delivery failed, stopping");
                return;
            }
        }

        debug!(listener = %self.name, "Listener stopped");
    }
}

async fn write_lines<W>(writer: &mut W, lines: &[String], name: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for line in lines {
        writer.write_all(delivery(line, name).as_bytes()).await?;
    }
    writer.flush().await
}
