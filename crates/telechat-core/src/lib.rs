//! # telechat-core
//!
//! Client registry and lock-step message distribution for telechat.
//!
//! - **Registry** - Named clients and their channel subscriptions
//! - **Mailboxes** - Round-scoped broadcast, channel and private entries
//! - **Round** - The barrier every publish runs through
//! - **Distributor** - Publish operations, the only writer of the mailboxes
//! - **Listener** - Per-connection round participant
//! - **Store** - Persistence seam for delivered messages
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ stage  ┌─────────────┐  read  ┌─────────────┐
//! │ Distributor │───────▶│  Mailboxes  │◀───────│  Listener   │
//! └─────────────┘        └─────────────┘        └─────────────┘
//!        │ start / done / proceed                      ▲
//!        └──────────────────┬──────────────────────────┘
//!                    ┌─────────────┐
//!                    │    Round    │
//!                    └─────────────┘
//! ```

pub mod distributor;
pub mod ignore;
pub mod listener;
pub mod mailbox;
pub mod message;
pub mod registry;
pub mod round;
pub mod store;

pub use distributor::{
    DistributionError, Distributor, DistributorConfig, IgnoredBroadcastPolicy, RoundReport,
};
pub use ignore::{IgnoreSet, SharedIgnoreSet};
pub use listener::Listener;
pub use mailbox::{BroadcastEntry, Mailboxes};
pub use message::{ChatMessage, ChatRecord, MessageKind, NewChatRecord};
pub use registry::{Registry, RegistryError, WEB_CLIENT_NAME};
pub use round::{RoundController, RoundId, RoundOutcome};
pub use store::{ChatStore, HistoryQuery, MemoryStore, StoreError, MAX_HISTORY_LIMIT};
