//! Per-listener ignore lists.
//!
//! Each listener keeps its own map of peer name to a deliver flag. The map is
//! rebuilt lazily: whenever the registry version differs from the version the
//! map was built at, newly seen peers are added with delivery enabled and
//! departed ones are dropped. Explicit ignores survive rebuilds, including for
//! peers that have left.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Ignore set shared between a session and its listener.
pub type SharedIgnoreSet = Arc<Mutex<IgnoreSet>>;

/// Lock a shared ignore set, recovering from poisoning.
pub fn lock(set: &SharedIgnoreSet) -> MutexGuard<'_, IgnoreSet> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A listener's view of which peers it accepts broadcasts from.
#[derive(Debug, Default)]
pub struct IgnoreSet {
    peers: HashMap<String, bool>,
    version: Option<u64>,
}

impl IgnoreSet {
    /// Create an empty set that will be built on first use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared set.
    #[must_use]
    pub fn shared() -> SharedIgnoreSet {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Whether the set was built against an older registry version.
    #[must_use]
    pub fn is_stale(&self, registry_version: u64) -> bool {
        self.version != Some(registry_version)
    }

    /// Sync with the current membership and record the version.
    ///
    /// Unseen peers are added with delivery enabled. Departed peers are
    /// dropped unless they are explicitly ignored.
    pub fn rebuild<I>(&mut self, names: I, registry_version: u64)
    where
        I: IntoIterator<Item = String>,
    {
        let current: HashSet<String> = names.into_iter().collect();
        self.peers
            .retain(|name, deliver| !*deliver || current.contains(name));
        for name in current {
            self.peers.entry(name).or_insert(true);
        }
        self.version = Some(registry_version);
    }

    /// Stop delivering broadcasts from a peer.
    pub fn ignore(&mut self, name: &str) {
        self.peers.insert(name.to_string(), false);
        debug!(peer = %name, "Ignoring peer");
    }

    /// Deliver from everyone again.
    pub fn reset(&mut self) {
        for deliver in self.peers.values_mut() {
            *deliver = true;
        }
    }

    /// Whether broadcasts from a sender are shown. Unknown senders are.
    #[must_use]
    pub fn delivers(&self, sender: &str) -> bool {
        self.peers.get(sender).copied().unwrap_or(true)
    }

    /// Number of known peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Check if no peer is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
