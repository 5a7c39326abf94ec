//! Client registry.
//!
//! The authoritative set of named, connected clients and their channel
//! subscriptions. All mutation goes through one mutex, and the same mutex
//! guards [`Registry::snapshot`], so a round always sees a membership that
//! existed at one instant.

use crate::round::{start_channel, Participant, StartReceiver, StartSender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

/// Name of the pseudo client that represents the HTTP facade.
pub const WEB_CLIENT_NAME: &str = "web";

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Another connected client already uses the name.
    #[error("User {0} already exists in chat")]
    NameTaken(String),

    /// The name is empty or contains whitespace.
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    /// The client already subscribes to the channel.
    #[error("channel {0} has already been added")]
    AlreadySubscribed(u32),

    /// No client with that name is registered.
    #[error("Unknown client: {0}")]
    UnknownClient(String),
}

/// Validate a client name.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidName`] for empty names and names with
/// whitespace.
pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// A registered client.
#[derive(Debug)]
pub struct Client {
    name: String,
    channels: Vec<u32>,
    start: Option<StartSender>,
}

impl Client {
    /// Client name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribed channel numbers.
    #[must_use]
    pub fn channels(&self) -> &[u32] {
        &self.channels
    }

    /// Whether the client has a listener taking part in rounds.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.start.is_some()
    }
}

/// Membership captured for one round.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// Registry version at capture time.
    pub version: u64,
    /// Every registered client, listening or not.
    pub names: Vec<String>,
    /// Listening clients.
    pub participants: Vec<Participant>,
}

impl RegistrySnapshot {
    /// Total registered clients, the pseudo client included.
    #[must_use]
    pub fn total(&self) -> usize {
        self.names.len()
    }

    /// Registered clients that do not listen.
    #[must_use]
    pub fn non_listening(&self) -> Vec<String> {
        self.names
            .iter()
            .filter(|name| !self.participants.iter().any(|p| &p.name == *name))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
struct Inner {
    clients: Vec<Client>,
    version: u64,
}

impl Inner {
    fn position(&self, name: &str) -> Option<usize> {
        self.clients.iter().position(|c| c.name == name)
    }

    fn client_mut(&mut self, name: &str) -> Result<&mut Client, RegistryError> {
        self.clients
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| RegistryError::UnknownClient(name.to_string()))
    }
}

/// The set of connected clients.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listening client.
    ///
    /// Returns the receiving end of the client's start channel; the listener
    /// built on it takes part in every round until the client is removed.
    ///
    /// # Errors
    ///
    /// Fails if the name is invalid or taken. The registry is unchanged on
    /// failure.
    pub fn join(&self, name: &str) -> Result<StartReceiver, RegistryError> {
        let (start, rounds) = start_channel();
        self.add(name, Some(start))?;
        Ok(rounds)
    }

    /// Register a client that never listens (the HTTP pseudo client).
    ///
    /// It counts towards the registry size but never takes part in rounds.
    ///
    /// # Errors
    ///
    /// Fails if the name is invalid or taken.
    pub fn add_pseudo(&self, name: &str) -> Result<(), RegistryError> {
        self.add(name, None)
    }

    fn add(&self, name: &str, start: Option<StartSender>) -> Result<(), RegistryError> {
        validate_name(name)?;

        let mut inner = self.lock();
        if inner.position(name).is_some() {
            return Err(RegistryError::NameTaken(name.to_string()));
        }

        inner.clients.push(Client {
            name: name.to_string(),
            channels: Vec::new(),
            start,
        });
        inner.version += 1;

        debug!(client = %name, total = inner.clients.len(), "Client registered");
        Ok(())
    }

    /// Remove a client. Order of the remaining clients is not preserved.
    ///
    /// Returns `true` if the client was registered.
    pub fn remove(&self, name: &str) -> bool {
        let mut inner = self.lock();
        let Some(index) = inner.position(name) else {
            return false;
        };

        inner.clients.swap_remove(index);
        inner.version += 1;

        debug!(client = %name, total = inner.clients.len(), "Client removed");
        true
    }

    /// Check if a name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.lock().position(name).is_some()
    }

    /// Number of registered clients, the pseudo client included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().clients.len()
    }

    /// Check if nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().clients.is_empty()
    }

    /// Membership version, bumped on every join and removal.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Every registered name.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.lock().clients.iter().map(|c| c.name.clone()).collect()
    }

    /// Every registered name together with the version it belongs to.
    #[must_use]
    pub fn membership(&self) -> (u64, Vec<String>) {
        let inner = self.lock();
        (
            inner.version,
            inner.clients.iter().map(|c| c.name.clone()).collect(),
        )
    }

    /// Names shown to users: listening clients only.
    #[must_use]
    pub fn user_names(&self) -> Vec<String> {
        self.lock()
            .clients
            .iter()
            .filter(|c| c.is_listening())
            .map(|c| c.name.clone())
            .collect()
    }

    /// Subscribe a client to a channel.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadySubscribed`] if the channel is already
    /// in the client's set, or [`RegistryError::UnknownClient`].
    pub fn subscribe(&self, name: &str, channel: u32) -> Result<(), RegistryError> {
        let mut inner = self.lock();
        let client = inner.client_mut(name)?;

        if client.channels.contains(&channel) {
            return Err(RegistryError::AlreadySubscribed(channel));
        }

        client.channels.push(channel);
        debug!(client = %name, channel, "Subscribed");
        Ok(())
    }

    /// Drop all of a client's subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownClient`] if the client is not
    /// registered.
    pub fn unsubscribe_all(&self, name: &str) -> Result<(), RegistryError> {
        let mut inner = self.lock();
        inner.client_mut(name)?.channels.clear();
        debug!(client = %name, "Unsubscribed from all channels");
        Ok(())
    }

    /// A client's subscribed channels.
    #[must_use]
    pub fn channels_of(&self, name: &str) -> Vec<u32> {
        let inner = self.lock();
        inner
            .position(name)
            .map(|i| inner.clients[i].channels.clone())
            .unwrap_or_default()
    }

    /// Capture membership and round participants in one step.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.lock();
        RegistrySnapshot {
            version: inner.version,
            names: inner.clients.iter().map(|c| c.name.clone()).collect(),
            participants: inner
                .clients
                .iter()
                .filter_map(|c| {
                    c.start.as_ref().map(|start| Participant {
                        name: c.name.clone(),
                        start: start.clone(),
                    })
                })
                .collect(),
        }
    }
}
